//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the retrieval, indexing, persistence and generation layers.
#[derive(Error, Debug)]
pub enum DocQaError {
    /// Malformed or empty caller-supplied data.
    #[error("invalid input: {0}")]
    Input(String),

    /// A chunk failed the store's content/metadata contract.
    #[error("chunk validation failed: {0}")]
    Validation(String),

    /// Positional lookup past the end of the chunk store.
    #[error("chunk index {index} out of range (store holds {len})")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Current store length.
        len: usize,
    },

    /// Vector length disagrees with the index dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Established dimensionality.
        expected: usize,
        /// Offending vector length.
        actual: usize,
    },

    /// Search attempted before any vectors exist.
    #[error("vector index is empty; ingest documents before querying")]
    EmptyIndex,

    /// A file the caller referenced does not exist.
    #[error("not found: {}", path.display())]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },

    /// Snapshot file exists but cannot be trusted.
    #[error("corrupt snapshot at {}: {reason}", path.display())]
    CorruptSnapshot {
        /// Snapshot location.
        path: PathBuf,
        /// What failed validation.
        reason: String,
    },

    /// Snapshot was built with a different embedding model.
    #[error("snapshot was embedded with '{stored}' but '{configured}' is configured; rebuild the store")]
    ModelMismatch {
        /// Model recorded in the snapshot.
        stored: String,
        /// Model the caller configured.
        configured: String,
    },

    /// Embedding backend failed or returned unusable vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Generator did not answer within the configured timeout.
    #[error("generation with '{model}' timed out after {}s", timeout.as_secs())]
    GenerationTimeout {
        /// Model identifier.
        model: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Generator returned an error status or an empty answer.
    #[error("generation with '{model}' failed: {message}")]
    GenerationFailure {
        /// Model identifier.
        model: String,
        /// Backend message.
        message: String,
        /// Transport failure or server-side status worth retrying.
        transient: bool,
    },

    /// Requested generation model is not in the configured list.
    #[error("model '{0}' is not one of the configured generation models")]
    UnknownModel(String),

    /// Configuration could not be read or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying filesystem or process failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocQaError {
    /// Stable machine-readable label used in API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input_error",
            Self::Validation(_) => "validation_error",
            Self::IndexOutOfRange { .. } => "index_error",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::EmptyIndex => "empty_index",
            Self::NotFound { .. } => "not_found",
            Self::CorruptSnapshot { .. } => "corrupt_snapshot",
            Self::ModelMismatch { .. } => "model_mismatch",
            Self::Embedding(_) => "embedding_error",
            Self::GenerationTimeout { .. } => "generation_timeout",
            Self::GenerationFailure { .. } => "generation_failure",
            Self::UnknownModel(_) => "unknown_model",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
        }
    }

    /// Whether a caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationTimeout { .. } | Self::GenerationFailure { transient: true, .. }
        )
    }

    pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, DocQaError>;
