//! Provenance-tagged text chunks and the ordered store that holds them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DocQaError, Result};

/// Source label applied when a loader could not identify the document.
pub const UNKNOWN_SOURCE: &str = "unknown";

fn default_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Document identifier (file name for PDFs).
    #[serde(default = "default_source")]
    pub source: String,
    /// Zero-based page number when the loader knows it.
    #[serde(default)]
    pub page: Option<u32>,
    /// Full path of the originating file.
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            source: default_source(),
            page: None,
            file_path: None,
        }
    }
}

impl ChunkMetadata {
    /// Metadata for a page of a known file.
    pub fn for_page(source: impl Into<String>, file_path: impl Into<String>, page: u32) -> Self {
        Self {
            source: source.into(),
            page: Some(page),
            file_path: Some(file_path.into()),
        }
    }

    /// Parses loosely-typed metadata, filling defaults for absent keys.
    ///
    /// Anything other than a JSON object (or `null`) is rejected, as are
    /// known keys carrying the wrong type. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(DocQaError::Validation(format!(
                    "metadata must be a mapping, got {}",
                    json_type(other)
                )))
            }
        };

        let source = match map.get("source") {
            None | Some(Value::Null) => default_source(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(DocQaError::Validation(format!(
                    "metadata.source must be a string, got {}",
                    json_type(other)
                )))
            }
        };
        let page = match map.get("page") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .and_then(|p| u32::try_from(p).ok())
                    .ok_or_else(|| {
                        DocQaError::Validation(format!(
                            "metadata.page must be a non-negative integer, got {n}"
                        ))
                    })?,
            ),
            Some(other) => {
                return Err(DocQaError::Validation(format!(
                    "metadata.page must be an integer, got {}",
                    json_type(other)
                )))
            }
        };
        let file_path = match map.get("file_path") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(DocQaError::Validation(format!(
                    "metadata.file_path must be a string, got {}",
                    json_type(other)
                )))
            }
        };

        Ok(Self {
            source,
            page,
            file_path,
        })
    }

    /// Human-readable `source, page N` label (pages shown one-based).
    pub fn label(&self) -> String {
        match self.page {
            Some(page) => format!("{}, page {}", self.source, page + 1),
            None => self.source.clone(),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Immutable unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk body.
    pub content: String,
    /// Provenance.
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds a chunk from already-typed metadata.
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Builds a chunk from untyped metadata, applying defaults.
    pub fn from_parts(content: impl Into<String>, metadata: &Value) -> Result<Self> {
        Ok(Self::new(content, ChunkMetadata::from_value(metadata)?))
    }

    fn validate(&self, position: usize) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(DocQaError::Validation(format!(
                "chunk {position} has empty content"
            )));
        }
        Ok(())
    }
}

/// Ordered, append-only collection of chunks.
///
/// A chunk's position is the key that joins it to its vector in the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch, preserving order. Nothing is appended if any chunk is invalid.
    pub fn append(&mut self, chunks: Vec<Chunk>) -> Result<()> {
        Self::validate_batch(&chunks)?;
        self.chunks.extend(chunks);
        Ok(())
    }

    /// Checks a batch against the store contract without mutating anything.
    pub fn validate_batch(chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Err(DocQaError::Input("chunk batch is empty".into()));
        }
        chunks
            .iter()
            .enumerate()
            .try_for_each(|(position, chunk)| chunk.validate(position))
    }

    /// Chunk at `index`.
    pub fn get(&self, index: usize) -> Result<&Chunk> {
        self.chunks.get(index).ok_or(DocQaError::IndexOutOfRange {
            index,
            len: self.chunks.len(),
        })
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterates chunks in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_defaults_fill_missing_keys() {
        let meta = ChunkMetadata::from_value(&json!({ "page": 3 })).expect("metadata");
        assert_eq!(meta.source, "unknown");
        assert_eq!(meta.page, Some(3));
        assert_eq!(meta.file_path, None);

        let meta = ChunkMetadata::from_value(&Value::Null).expect("null metadata");
        assert_eq!(meta, ChunkMetadata::default());
    }

    #[test]
    fn metadata_rejects_non_mapping_and_bad_types() {
        let err = ChunkMetadata::from_value(&json!(["a", "b"])).unwrap_err();
        assert!(matches!(err, DocQaError::Validation(_)));

        let err = ChunkMetadata::from_value(&json!({ "page": "two" })).unwrap_err();
        assert!(err.to_string().contains("metadata.page"));

        let err = ChunkMetadata::from_value(&json!({ "page": -1 })).unwrap_err();
        assert!(matches!(err, DocQaError::Validation(_)));
    }

    #[test]
    fn deserializing_partial_metadata_applies_defaults() {
        let chunk: Chunk = serde_json::from_value(json!({ "content": "hello" })).expect("chunk");
        assert_eq!(chunk.metadata.source, "unknown");
        assert_eq!(chunk.metadata.page, None);
    }

    #[test]
    fn append_is_all_or_nothing() {
        let mut store = ChunkStore::new();
        store
            .append(vec![Chunk::new("first", ChunkMetadata::default())])
            .expect("append");

        let err = store
            .append(vec![
                Chunk::new("second", ChunkMetadata::default()),
                Chunk::new("   ", ChunkMetadata::default()),
            ])
            .unwrap_err();
        assert!(matches!(err, DocQaError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_out_of_range_reports_length() {
        let mut store = ChunkStore::new();
        store
            .append(vec![Chunk::new("only", ChunkMetadata::default())])
            .expect("append");
        assert_eq!(store.get(0).expect("chunk").content, "only");
        match store.get(4) {
            Err(DocQaError::IndexOutOfRange { index, len }) => {
                assert_eq!((index, len), (4, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn label_is_one_based() {
        let meta = ChunkMetadata::for_page("manual.pdf", "/docs/manual.pdf", 0);
        assert_eq!(meta.label(), "manual.pdf, page 1");
    }
}
