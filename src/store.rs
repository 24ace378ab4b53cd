//! Lockstep pairing of the vector index with its chunk store.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::chunk::{Chunk, ChunkStore};
use crate::error::{DocQaError, Result};
use crate::index::{FlatIndex, Neighbor};

/// Index and chunks that always hold the same number of entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    embedding_model: Option<String>,
    index: FlatIndex,
    chunks: ChunkStore,
}

/// Summary counters for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of chunks (equals number of vectors).
    pub chunks: usize,
    /// Vector dimensionality, once known.
    pub dim: Option<usize>,
    /// Distinct `source` values.
    pub documents: usize,
    /// Model the vectors were produced with.
    pub embedding_model: Option<String>,
}

impl VectorStore {
    /// Empty store that will record `embedding_model` on first build.
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: Some(embedding_model.into()),
            ..Self::default()
        }
    }

    /// Builds a store from one ingestion batch.
    pub fn build(
        embedding_model: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: &[Vec<f32>],
    ) -> Result<Self> {
        let mut store = Self::new(embedding_model);
        store.add(chunks, vectors)?;
        Ok(store)
    }

    pub(crate) fn from_parts(
        embedding_model: Option<String>,
        index: FlatIndex,
        chunks: ChunkStore,
    ) -> Self {
        Self {
            embedding_model,
            index,
            chunks,
        }
    }

    /// Appends chunks and their vectors as one step.
    ///
    /// Counts, chunk contents and vector shapes are all validated before
    /// either structure changes, so a failed add leaves the store untouched.
    pub fn add(&mut self, chunks: Vec<Chunk>, vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(DocQaError::Input(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        ChunkStore::validate_batch(&chunks)?;

        // Index::add validates every vector before touching its buffer, and the
        // chunk batch was validated above, so neither step can fail half-way.
        self.index.add(vectors)?;
        self.chunks.append(chunks)?;
        debug_assert_eq!(self.index.len(), self.chunks.len());
        Ok(())
    }

    /// Nearest neighbors of `query`, joined to their chunks.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Neighbor, &Chunk)>> {
        let hits = self.index.search(query, k)?;
        hits.into_iter()
            .map(|hit| Ok((hit, self.chunks.get(hit.index)?)))
            .collect()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True before the first successful add.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Underlying index.
    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    /// Underlying chunks.
    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Embedding model recorded for this store.
    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    /// Fails with [`DocQaError::ModelMismatch`] when `configured` differs from the recorded model.
    pub fn ensure_model(&self, configured: &str) -> Result<()> {
        match self.embedding_model.as_deref() {
            Some(stored) if stored != configured => Err(DocQaError::ModelMismatch {
                stored: stored.to_string(),
                configured: configured.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// True when a chunk from `file_path` is already indexed.
    pub fn contains_file(&self, file_path: &str) -> bool {
        self.chunks
            .iter()
            .any(|chunk| chunk.metadata.file_path.as_deref() == Some(file_path))
    }

    /// Summary counters.
    pub fn stats(&self) -> StoreStats {
        let documents: BTreeSet<&str> = self
            .chunks
            .iter()
            .map(|chunk| chunk.metadata.source.as_str())
            .collect();
        StoreStats {
            chunks: self.len(),
            dim: self.index.dim(),
            documents: documents.len(),
            embedding_model: self.embedding_model.clone(),
        }
    }
}

/// Thread-safe handle: many concurrent searches, exclusive appends.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<VectorStore>>,
}

impl SharedStore {
    /// Shares an existing store.
    pub fn new(store: VectorStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// Shared read access for searches.
    pub fn read(&self) -> RwLockReadGuard<'_, VectorStore> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusive access for appends.
    pub fn write(&self) -> RwLockWriteGuard<'_, VectorStore> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends under the write lock.
    pub fn add(&self, chunks: Vec<Chunk>, vectors: &[Vec<f32>]) -> Result<()> {
        self.write().add(chunks, vectors)
    }

    /// Current chunk count.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Summary counters.
    pub fn stats(&self) -> StoreStats {
        self.read().stats()
    }
}
