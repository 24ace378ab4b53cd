//! Explicitly constructed pipeline context shared by the binaries.
//!
//! An [`Assistant`] owns the embedding gateway, the shared vector store, the
//! generator and the prompt template. Handlers receive it by reference (or in
//! an `Arc`); nothing here is global.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::chunk::Chunk;
use crate::config::DocQaConfig;
use crate::embedder::EmbeddingGateway;
use crate::error::{DocQaError, Result};
use crate::generator::{Generator, RetryPolicy};
use crate::ingest::{canonical_path, collect_documents, loader_for, PageRecord};
use crate::retriever::{RetrievedResult, Retriever};
use crate::snapshot;
use crate::splitter::RecursiveSplitter;
use crate::store::{SharedStore, StoreStats, VectorStore};

/// Retrieved context and the prompt built from it.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPrompt {
    /// Citation-tagged context, closest first.
    pub sources: Vec<RetrievedResult>,
    /// Fully rendered prompt.
    pub prompt: String,
}

/// A generated answer with the context it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Generator output.
    pub answer: String,
    /// Model that produced it.
    pub model: String,
    /// Prompt sent to the model.
    pub prompt: String,
    /// Sources the citation ids refer to.
    pub sources: Vec<RetrievedResult>,
}

/// Outcome of [`Assistant::ingest_path`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Files whose chunks were added.
    pub indexed: Vec<PathBuf>,
    /// Files already present in the store.
    pub skipped: Vec<PathBuf>,
    /// Files that produced no text.
    pub empty: Vec<PathBuf>,
    /// Files that failed, with the error message.
    pub failed: Vec<(PathBuf, String)>,
    /// Chunks appended during this run.
    pub chunks_added: usize,
    /// Store size afterwards.
    pub total_chunks: usize,
}

/// Gateway + store + generator + template, built from one configuration.
pub struct Assistant {
    config: DocQaConfig,
    store: SharedStore,
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    splitter: RecursiveSplitter,
}

impl Assistant {
    /// Builds backends from `config` and loads (or starts) the snapshot.
    pub fn open(config: DocQaConfig) -> Result<Self> {
        let gateway = config.embedding.build_gateway()?;
        let generator = config.generation.build_generator()?;
        Self::with_components(config, gateway, generator)
    }

    /// Uses caller-supplied backends; the snapshot is still read from `config.snapshot_path`.
    ///
    /// A missing snapshot starts an empty store. A snapshot built with a
    /// different embedding model is refused with [`DocQaError::ModelMismatch`].
    pub fn with_components(
        config: DocQaConfig,
        gateway: EmbeddingGateway,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;
        let splitter = config.chunking.splitter()?;
        let store = match snapshot::load(&config.snapshot_path) {
            Ok(store) => {
                store.ensure_model(gateway.model_name())?;
                store
            }
            Err(DocQaError::NotFound { path }) => {
                tracing::info!(path = %path.display(), "no snapshot yet; starting empty store");
                VectorStore::new(gateway.model_name())
            }
            Err(err) => return Err(err),
        };
        let store = SharedStore::new(store);
        let retry = config.generation.retry_policy();
        Ok(Self {
            retriever: Retriever::new(gateway, store.clone()),
            store,
            generator,
            retry,
            splitter,
            config,
        })
    }

    /// Overrides the generation retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &DocQaConfig {
        &self.config
    }

    /// Embedding gateway shared with the retriever.
    pub fn gateway(&self) -> &EmbeddingGateway {
        self.retriever.gateway()
    }

    /// Shared store handle.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Generation models a caller may choose from.
    pub fn models(&self) -> &[String] {
        &self.config.generation.models
    }

    /// Store counters.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Retrieves with the configured default depth when `top_k` is `None`.
    pub fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<RetrievedResult>> {
        let top_k = self.config.retrieval.resolve_top_k(top_k)?;
        self.retriever.retrieve(query, top_k)
    }

    /// Retrieves context and renders the prompt without calling the generator.
    pub fn prepare(&self, query: &str, top_k: Option<usize>) -> Result<PreparedPrompt> {
        let sources = self.retrieve(query, top_k)?;
        let prompt = self.config.prompt.build_prompt(query, &sources);
        Ok(PreparedPrompt { sources, prompt })
    }

    /// Validates a query against the current store and resolves its depth.
    ///
    /// Runs before any embedding so an empty store or a bad depth is reported
    /// as such even when the embedding backend is down.
    pub fn check_query(&self, query: &str, top_k: Option<usize>) -> Result<usize> {
        if query.trim().is_empty() {
            return Err(DocQaError::Input("query must not be empty".into()));
        }
        let top_k = self.config.retrieval.resolve_top_k(top_k)?;
        if self.store.is_empty() {
            return Err(DocQaError::EmptyIndex);
        }
        Ok(top_k)
    }

    /// Embeds a query for callers that cache query vectors.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(DocQaError::Input("query must not be empty".into()));
        }
        self.gateway().embed_one(query)
    }

    /// Like [`Assistant::prepare`] with an already embedded query.
    pub fn prepare_with_vector(
        &self,
        query: &str,
        vector: &[f32],
        top_k: Option<usize>,
    ) -> Result<PreparedPrompt> {
        let top_k = self.check_query(query, top_k)?;
        let sources = self.retriever.retrieve_by_vector(vector, top_k)?;
        let prompt = self.config.prompt.build_prompt(query, &sources);
        Ok(PreparedPrompt { sources, prompt })
    }

    /// Runs the generator on a prepared prompt, retrying transient failures.
    pub fn generate(&self, prepared: PreparedPrompt, model: &str) -> Result<Answer> {
        let PreparedPrompt { sources, prompt } = prepared;
        tracing::debug!(model, sources = sources.len(), "generating answer");
        let answer = self.retry.generate(self.generator.as_ref(), &prompt, model)?;
        Ok(Answer {
            answer,
            model: model.to_string(),
            prompt,
            sources,
        })
    }

    /// Full query pipeline: retrieve, assemble, generate.
    pub fn ask(&self, query: &str, model: Option<&str>, top_k: Option<usize>) -> Result<Answer> {
        let model = self.config.generation.resolve_model(model)?;
        let prepared = self.prepare(query, top_k)?;
        self.generate(prepared, &model)
    }

    /// Validates a caller's model choice, falling back to the default.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String> {
        self.config.generation.resolve_model(requested)
    }

    /// True when chunks from `path` (under any spelling) are already indexed.
    pub fn is_indexed(&self, path: &Path) -> bool {
        let file_path = canonical_path(path).display().to_string();
        self.store.read().contains_file(&file_path)
    }

    /// Loads and splits one document.
    pub fn load_chunks(&self, path: &Path) -> Result<Vec<Chunk>> {
        let pages = loader_for(path)?.load(path)?;
        Ok(self.splitter.split_pages(&pages))
    }

    /// Splits already loaded pages.
    pub fn split_pages(&self, pages: &[PageRecord]) -> Vec<Chunk> {
        self.splitter.split_pages(pages)
    }

    /// Embeds `chunks` and appends them; returns the number added.
    pub fn ingest_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = self.gateway().embed_batch(&texts)?;
        self.add_embedded(chunks, &vectors)
    }

    /// Appends chunks whose vectors were computed elsewhere.
    pub fn add_embedded(&self, chunks: Vec<Chunk>, vectors: &[Vec<f32>]) -> Result<usize> {
        let added = chunks.len();
        self.store.add(chunks, vectors)?;
        Ok(added)
    }

    /// Writes the snapshot to the configured path.
    pub fn save(&self) -> Result<()> {
        snapshot::save(&self.store.read(), &self.config.snapshot_path)
    }

    /// Loads, splits, embeds and appends a file or directory, then saves.
    ///
    /// A single missing or failing file is an error. Inside a directory, failing
    /// files are logged and reported while the rest are still indexed.
    pub fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        self.ingest_path_with(path, |_, texts| self.gateway().embed_batch(texts))
    }

    /// Like [`Assistant::ingest_path`] with a caller-supplied embedding step,
    /// called once per document with its chunk texts.
    ///
    /// Whatever was added is saved before returning, including when a single
    /// file fails.
    pub fn ingest_path_with<F>(&self, path: &Path, mut embed: F) -> Result<IngestReport>
    where
        F: FnMut(&Path, &[&str]) -> Result<Vec<Vec<f32>>>,
    {
        let single = path.is_file();
        let files = collect_documents(path)?;
        let mut report = IngestReport::default();
        let mut fatal = None;

        for file in files {
            if self.is_indexed(&file) {
                tracing::info!(path = %file.display(), "already indexed; skipping");
                report.skipped.push(file);
                continue;
            }
            let outcome = self.load_chunks(&file).and_then(|chunks| {
                if chunks.is_empty() {
                    return Ok(0);
                }
                let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
                let vectors = embed(file.as_path(), texts.as_slice())?;
                self.add_embedded(chunks, &vectors)
            });
            match outcome {
                Ok(0) => {
                    tracing::warn!(path = %file.display(), "no extractable text");
                    report.empty.push(file);
                }
                Ok(added) => {
                    tracing::info!(path = %file.display(), chunks = added, "indexed document");
                    report.chunks_added += added;
                    report.indexed.push(file);
                }
                Err(err) if !single => {
                    tracing::warn!(
                        path = %file.display(),
                        error = %err,
                        "failed to ingest; skipping"
                    );
                    report.failed.push((file, err.to_string()));
                }
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
        }

        if report.chunks_added > 0 {
            self.save()?;
        }
        if let Some(err) = fatal {
            return Err(err);
        }
        report.total_chunks = self.store.len();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;
    use crate::embedder::hashing::HashingEmbedder;

    struct Echo;

    impl Generator for Echo {
        fn generate(&self, prompt: &str, model: &str) -> Result<String> {
            Ok(format!("{model}: {} chars [1]", prompt.len()))
        }
    }

    fn assistant_in(dir: &Path) -> Assistant {
        let config = DocQaConfig {
            snapshot_path: dir.join("store.snapshot"),
            ..DocQaConfig::default()
        };
        Assistant::with_components(
            config,
            EmbeddingGateway::new(HashingEmbedder::new(64).expect("embedder")),
            Arc::new(Echo),
        )
        .expect("assistant")
    }

    #[test]
    fn ask_on_empty_store_is_empty_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assistant = assistant_in(dir.path());
        assert!(matches!(
            assistant.ask("anything?", None, None),
            Err(DocQaError::EmptyIndex)
        ));
    }

    #[test]
    fn unknown_model_is_rejected_before_retrieval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assistant = assistant_in(dir.path());
        assert!(matches!(
            assistant.ask("q", Some("gpt-nope"), None),
            Err(DocQaError::UnknownModel(_))
        ));
    }

    #[test]
    fn ask_returns_answer_with_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assistant = assistant_in(dir.path());
        let pages = vec![PageRecord::new(
            "Rust guarantees memory safety without a garbage collector.",
            ChunkMetadata::for_page("rust.pdf", "/d/rust.pdf", 0),
        )];
        let added = assistant
            .ingest_chunks(assistant.split_pages(&pages))
            .expect("ingest");
        assert_eq!(added, 1);

        let answer = assistant
            .ask("How does Rust ensure memory safety?", Some("llama3.2:3b"), Some(3))
            .expect("answer");
        assert_eq!(answer.model, "llama3.2:3b");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].citation_id, "[1]");
        assert!(answer.prompt.ends_with("How does Rust ensure memory safety?"));
    }

    #[test]
    fn failing_file_in_directory_is_reported_and_the_rest_saved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).expect("mkdir");
        std::fs::write(docs.join("a.txt"), "Ownership moves values.").expect("write");
        std::fs::write(docs.join("b.txt"), "Borrowing lends references.").expect("write");
        std::fs::write(docs.join("c.md"), "   ").expect("write");

        let assistant = assistant_in(dir.path());
        let report = assistant
            .ingest_path_with(&docs, |file, texts| {
                if file.ends_with("b.txt") {
                    return Err(DocQaError::Embedding("backend returned 503".into()));
                }
                assistant.gateway().embed_batch(texts)
            })
            .expect("directory ingest");
        assert_eq!(report.indexed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("b.txt"));
        assert_eq!(report.empty.len(), 1);
        assert_eq!(report.chunks_added, 1);

        let reopened = assistant_in(dir.path());
        assert_eq!(reopened.stats().chunks, 1);
        assert!(reopened.is_indexed(&docs.join("a.txt")));
        assert!(!reopened.is_indexed(&docs.join("b.txt")));
    }

    #[test]
    fn reopening_with_other_model_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assistant = assistant_in(dir.path());
        assistant
            .ingest_chunks(vec![Chunk::new("some text", ChunkMetadata::default())])
            .expect("ingest");
        assistant.save().expect("save");

        let config = DocQaConfig {
            snapshot_path: dir.path().join("store.snapshot"),
            ..DocQaConfig::default()
        };
        let reopened = Assistant::with_components(
            config,
            EmbeddingGateway::new(HashingEmbedder::new(32).expect("embedder")),
            Arc::new(Echo),
        );
        assert!(matches!(reopened, Err(DocQaError::ModelMismatch { .. })));
    }
}
