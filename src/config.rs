//! TOML configuration with defaults for every field.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::embedder::hashing::{HashingEmbedder, DEFAULT_HASHING_DIMENSIONS};
use crate::embedder::openai::{OpenAiEmbedder, OpenAiEmbedderOptions};
use crate::embedder::EmbeddingGateway;
use crate::error::{DocQaError, Result};
use crate::generator::ollama::{OllamaGenerator, DEFAULT_OLLAMA_URL};
use crate::generator::openai::{OpenAiGenerator, DEFAULT_OPENAI_URL};
use crate::generator::{Generator, RetryPolicy};
use crate::prompt::PromptTemplate;
use crate::splitter::RecursiveSplitter;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocQaConfig {
    /// Where the vector store snapshot lives.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Embedding backend.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Text generation backend.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Retrieval depth and presentation.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Splitter sizes.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Prompt wording.
    #[serde(default)]
    pub prompt: PromptTemplate,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/processed/vector_store.snapshot")
}

impl Default for DocQaConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
            prompt: PromptTemplate::default(),
        }
    }
}

/// Which embedding implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[value(name = "openai")]
    OpenAi,
    /// Offline feature hashing.
    Hashing,
}

/// Embedding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend kind.
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,
    /// Model name, recorded in snapshots.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL of the embeddings API.
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dimension override (remote) or vector size (hashing).
    #[serde(default)]
    pub dimensions: Option<usize>,
    /// Inputs per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Request timeout in seconds.
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    /// Attempts on transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::OpenAi
}
fn default_embedding_model() -> String {
    "all-minilm".into()
}
fn default_embedding_url() -> String {
    "http://127.0.0.1:11434/v1".into()
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_max_retries() -> usize {
    5
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_embedding_url(),
            api_key: None,
            dimensions: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    /// Model name the built gateway will report.
    pub fn effective_model(&self) -> String {
        match self.provider {
            EmbeddingProvider::OpenAi => self.model.clone(),
            EmbeddingProvider::Hashing => {
                format!("hashing-{}", self.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS))
            }
        }
    }

    /// Builds the configured gateway.
    pub fn build_gateway(&self) -> Result<EmbeddingGateway> {
        match self.provider {
            EmbeddingProvider::OpenAi => {
                let embedder = OpenAiEmbedder::new(OpenAiEmbedderOptions {
                    api_key: self.api_key.clone(),
                    base_url: self.base_url.clone(),
                    model: self.model.clone(),
                    dimensions: self.dimensions,
                    timeout: Duration::from_secs(self.timeout_secs),
                    max_retries: self.max_retries,
                    batch_size: self.batch_size,
                })?;
                Ok(EmbeddingGateway::new(embedder))
            }
            EmbeddingProvider::Hashing => Ok(EmbeddingGateway::new(HashingEmbedder::new(
                self.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS),
            )?)),
        }
    }
}

/// Which generation implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// Ollama `/api/generate`.
    Ollama,
    /// OpenAI-compatible chat completions.
    #[value(name = "openai")]
    OpenAi,
}

/// Generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Backend kind.
    #[serde(default = "default_generation_provider")]
    pub provider: GenerationProvider,
    /// Base URL; defaults per provider.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Models a caller may pick.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Model used when the caller names none.
    #[serde(default = "default_generation_model")]
    pub default_model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_generation_provider() -> GenerationProvider {
    GenerationProvider::Ollama
}
fn default_models() -> Vec<String> {
    vec!["phi3:mini".into(), "llama3.2:3b".into()]
}
fn default_generation_model() -> String {
    "phi3:mini".into()
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_max_attempts() -> usize {
    3
}
fn default_temperature() -> f32 {
    0.2
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: None,
            api_key: None,
            models: default_models(),
            default_model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            max_attempts: default_max_attempts(),
            temperature: default_temperature(),
        }
    }
}

impl GenerationConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Builds the configured generator.
    pub fn build_generator(&self) -> Result<Arc<dyn Generator>> {
        let generator: Arc<dyn Generator> = match self.provider {
            GenerationProvider::Ollama => Arc::new(OllamaGenerator::new(
                self.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
                self.timeout(),
                self.temperature,
            )?),
            GenerationProvider::OpenAi => Arc::new(OpenAiGenerator::new(
                self.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_URL),
                self.api_key.as_deref(),
                self.timeout(),
                self.temperature,
            )?),
        };
        Ok(generator)
    }

    /// Retry policy for generation calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }

    /// Resolves an optional caller choice against the configured list.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String> {
        let model = requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        if self.models.iter().any(|m| m == model) {
            Ok(model.to_string())
        } else {
            Err(DocQaError::UnknownModel(model.to_string()))
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default number of chunks per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound accepted from callers.
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Characters shown per source preview.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_top_k() -> usize {
    4
}
fn default_max_top_k() -> usize {
    10
}
fn default_preview_chars() -> usize {
    400
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    /// Applies the default and checks the caller's depth is within `1..=max_top_k`.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> Result<usize> {
        let top_k = requested.unwrap_or(self.top_k);
        if top_k == 0 || top_k > self.max_top_k {
            return Err(DocQaError::Input(format!(
                "top_k must be between 1 and {}, got {top_k}",
                self.max_top_k
            )));
        }
        Ok(top_k)
    }
}

/// Splitter sizes in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk length.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap between neighbors.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    crate::splitter::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    crate::splitter::DEFAULT_CHUNK_OVERLAP
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    /// Splitter with these sizes.
    pub fn splitter(&self) -> Result<RecursiveSplitter> {
        RecursiveSplitter::new(self.chunk_size, self.chunk_overlap)
    }
}

impl DocQaConfig {
    /// Reads and validates a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            DocQaError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|err| {
            DocQaError::Config(format!("failed to parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise returns validated defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.models.is_empty() {
            return Err(DocQaError::Config(
                "generation.models must list at least one model".into(),
            ));
        }
        if !generation.models.contains(&generation.default_model) {
            return Err(DocQaError::Config(format!(
                "generation.default_model '{}' is not in generation.models",
                generation.default_model
            )));
        }
        if generation.timeout_secs == 0 {
            return Err(DocQaError::Config(
                "generation.timeout_secs must be at least 1".into(),
            ));
        }
        let retrieval = &self.retrieval;
        if retrieval.max_top_k == 0
            || retrieval.top_k == 0
            || retrieval.top_k > retrieval.max_top_k
        {
            return Err(DocQaError::Config(format!(
                "retrieval.top_k ({}) must be within 1..={}",
                retrieval.top_k, retrieval.max_top_k
            )));
        }
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 || chunking.chunk_overlap > chunking.chunk_size {
            return Err(DocQaError::Config(format!(
                "chunking.chunk_size ({}) must be positive and >= chunk_overlap ({})",
                chunking.chunk_size, chunking.chunk_overlap
            )));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(DocQaError::Config("embedding.model must not be empty".into()));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(DocQaError::Config(
                "embedding.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Command-line overrides shared by the binaries.
///
/// Values given on the command line (or through `DOCQA_*` variables) replace
/// the matching fields of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Optional TOML config file
    #[arg(long, env = "DOCQA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Vector store snapshot path
    #[arg(long, env = "DOCQA_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Embedding backend
    #[arg(long, env = "DOCQA_EMBEDDING_PROVIDER", value_enum)]
    pub embedding_provider: Option<EmbeddingProvider>,

    /// Embedding model identifier (e.g. all-minilm)
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Base URL for the OpenAI-compatible embeddings API
    #[arg(long, env = "DOCQA_EMBEDDING_URL")]
    pub embedding_url: Option<String>,

    /// API key for embedding calls
    #[arg(long, env = "DOCQA_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Generation backend
    #[arg(long, env = "DOCQA_GENERATION_PROVIDER", value_enum)]
    pub generation_provider: Option<GenerationProvider>,

    /// Base URL for the generation API
    #[arg(long, env = "DOCQA_GENERATION_URL")]
    pub generation_url: Option<String>,

    /// API key for generation calls
    #[arg(long, env = "DOCQA_GENERATION_API_KEY", hide_env_values = true)]
    pub generation_api_key: Option<String>,

    /// Max seconds to wait for one generation request
    #[arg(long, env = "DOCQA_GENERATION_TIMEOUT_SECS")]
    pub generation_timeout_secs: Option<u64>,
}

impl ConfigArgs {
    /// Loads the config file (or defaults), applies overrides and validates.
    pub fn resolve(&self) -> Result<DocQaConfig> {
        let mut config = DocQaConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.snapshot {
            config.snapshot_path = path.clone();
        }
        if let Some(provider) = self.embedding_provider {
            config.embedding.provider = provider;
        }
        if let Some(model) = &self.embedding_model {
            config.embedding.model = model.clone();
        }
        if let Some(url) = &self.embedding_url {
            config.embedding.base_url = url.clone();
        }
        if let Some(key) = &self.embedding_api_key {
            config.embedding.api_key = Some(key.clone());
        }
        if let Some(provider) = self.generation_provider {
            config.generation.provider = provider;
        }
        if let Some(url) = &self.generation_url {
            config.generation.base_url = Some(url.clone());
        }
        if let Some(key) = &self.generation_api_key {
            config.generation.api_key = Some(key.clone());
        }
        if let Some(secs) = self.generation_timeout_secs {
            config.generation.timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DocQaConfig::load(None).expect("defaults");
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.generation.default_model, "phi3:mini");
        assert_eq!(
            config.snapshot_path,
            PathBuf::from("data/processed/vector_store.snapshot")
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docqa.toml");
        std::fs::write(
            &path,
            r#"
snapshot_path = "store.snapshot"

[embedding]
provider = "hashing"
dimensions = 64

[retrieval]
top_k = 6
"#,
        )
        .expect("write");
        let config = DocQaConfig::load_from(&path).expect("load");
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.embedding.effective_model(), "hashing-64");
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.retrieval.max_top_k, 10);
        assert_eq!(config.generation.models.len(), 2);
        let gateway = config.embedding.build_gateway().expect("gateway");
        assert_eq!(gateway.model_name(), "hashing-64");
    }

    #[test]
    fn default_model_must_be_listed() {
        let mut config = DocQaConfig::default();
        config.generation.default_model = "mistral".into();
        assert!(matches!(config.validate(), Err(DocQaError::Config(_))));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut config = DocQaConfig::default();
        config.generation.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(DocQaError::Config(_))));

        let mut config = DocQaConfig::default();
        config.embedding.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(DocQaError::Config(_))));

        let args = ConfigArgs {
            generation_timeout_secs: Some(0),
            ..ConfigArgs::default()
        };
        assert!(matches!(args.resolve(), Err(DocQaError::Config(_))));
    }

    #[test]
    fn resolves_model_and_depth() {
        let config = DocQaConfig::default();
        assert_eq!(config.generation.resolve_model(None).expect("model"), "phi3:mini");
        assert_eq!(
            config.generation.resolve_model(Some("llama3.2:3b")).expect("model"),
            "llama3.2:3b"
        );
        assert!(matches!(
            config.generation.resolve_model(Some("gpt-9")),
            Err(DocQaError::UnknownModel(_))
        ));
        assert_eq!(config.retrieval.resolve_top_k(None).expect("k"), 4);
        assert!(config.retrieval.resolve_top_k(Some(0)).is_err());
        assert!(config.retrieval.resolve_top_k(Some(11)).is_err());
    }

    #[test]
    fn command_line_overrides_win() {
        let args = ConfigArgs {
            snapshot: Some(PathBuf::from("other.snapshot")),
            embedding_provider: Some(EmbeddingProvider::Hashing),
            generation_timeout_secs: Some(5),
            ..ConfigArgs::default()
        };
        let config = args.resolve().expect("config");
        assert_eq!(config.snapshot_path, PathBuf::from("other.snapshot"));
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.generation.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.toml");
        assert!(matches!(
            DocQaConfig::load_from(&path),
            Err(DocQaError::Config(_))
        ));
    }
}
