#![warn(missing_docs)]
//! Core library for docqa: citation-grounded question answering over local documents.
//!
//! Documents are split into chunks, embedded into unit vectors and indexed for
//! exact nearest-neighbor search. A query retrieves the closest chunks, tags
//! them with per-answer citation ids and renders a prompt that confines the
//! generator to that context.

pub mod assistant;
pub mod chunk;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod present;
pub mod prompt;
pub mod retriever;
pub mod snapshot;
pub mod splitter;
pub mod store;

pub use assistant::{Answer, Assistant, IngestReport, PreparedPrompt};
pub use chunk::{Chunk, ChunkMetadata, ChunkStore};
pub use config::DocQaConfig;
pub use embedder::{Embedder, EmbeddingGateway};
pub use error::{DocQaError, Result};
pub use generator::{Generator, RetryPolicy};
pub use index::{FlatIndex, Neighbor};
pub use ingest::{DocumentLoader, PageRecord};
pub use present::{format_answer, format_sources};
pub use prompt::{build_prompt, PromptTemplate};
pub use retriever::{RetrievedResult, Retriever};
pub use splitter::RecursiveSplitter;
pub use store::{SharedStore, StoreStats, VectorStore};
