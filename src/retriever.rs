//! Query → ranked, citation-tagged context.

use serde::Serialize;

use crate::chunk::ChunkMetadata;
use crate::embedder::EmbeddingGateway;
use crate::error::{DocQaError, Result};
use crate::store::SharedStore;

/// One retrieved chunk, labelled for citation within a single answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedResult {
    /// Rank-based label such as `[1]`; unique within one retrieval only.
    pub citation_id: String,
    /// One-based rank (1 is closest).
    pub rank: usize,
    /// Position of the chunk in the store.
    pub chunk_index: usize,
    /// Chunk text.
    pub content: String,
    /// Raw squared Euclidean distance to the query.
    pub distance: f32,
    /// Chunk provenance.
    pub metadata: ChunkMetadata,
}

impl RetrievedResult {
    /// Cosine similarity implied by `distance`, valid because stored and
    /// query vectors are unit length (`|a-b|² = 2 - 2·cos`).
    pub fn cosine_similarity(&self) -> f32 {
        1.0 - self.distance / 2.0
    }
}

/// Citation label for a one-based rank.
pub fn citation_id(rank: usize) -> String {
    format!("[{rank}]")
}

/// Embeds queries and searches the shared store.
#[derive(Clone)]
pub struct Retriever {
    gateway: EmbeddingGateway,
    store: SharedStore,
}

impl Retriever {
    /// Couples a gateway with the store it embedded.
    pub fn new(gateway: EmbeddingGateway, store: SharedStore) -> Self {
        Self { gateway, store }
    }

    /// Gateway used for query embeddings.
    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    /// Embeds `query` and returns up to `top_k` results, closest first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedResult>> {
        if query.trim().is_empty() {
            return Err(DocQaError::Input("query must not be empty".into()));
        }
        if top_k == 0 {
            return Err(DocQaError::Input("top_k must be at least 1".into()));
        }
        if self.store.is_empty() {
            return Err(DocQaError::EmptyIndex);
        }
        let vector = self.gateway.embed_one(query)?;
        self.retrieve_by_vector(&vector, top_k)
    }

    /// Searches with an already embedded query.
    pub fn retrieve_by_vector(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedResult>> {
        if top_k == 0 {
            return Err(DocQaError::Input("top_k must be at least 1".into()));
        }
        let store = self.store.read();
        let hits = store.search(vector, top_k)?;
        let results: Vec<RetrievedResult> = hits
            .into_iter()
            .enumerate()
            .map(|(position, (hit, chunk))| {
                let rank = position + 1;
                RetrievedResult {
                    citation_id: citation_id(rank),
                    rank,
                    chunk_index: hit.index,
                    content: chunk.content.clone(),
                    distance: hit.distance,
                    metadata: chunk.metadata.clone(),
                }
            })
            .collect();
        tracing::debug!(
            requested = top_k,
            returned = results.len(),
            indexed = store.len(),
            "retrieved context"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::embedder::Embedder;
    use crate::store::VectorStore;

    /// Maps a handful of fixed strings to fixed 2-d vectors.
    struct TableEmbedder;

    impl Embedder for TableEmbedder {
        fn model_name(&self) -> &str {
            "table"
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|text| match *text {
                    "north" => vec![0.0, 1.0],
                    "mostly east" => vec![0.9, 0.1],
                    _ => vec![1.0, 0.0],
                })
                .collect())
        }
    }

    fn retriever_with(texts: &[&str]) -> Retriever {
        let gateway = EmbeddingGateway::new(TableEmbedder);
        let store = if texts.is_empty() {
            VectorStore::new("table")
        } else {
            let vectors = gateway.embed_batch(texts).expect("embed");
            let chunks = texts
                .iter()
                .map(|t| Chunk::new(*t, ChunkMetadata::default()))
                .collect();
            VectorStore::build("table", chunks, &vectors).expect("build")
        };
        Retriever::new(gateway, SharedStore::new(store))
    }

    #[test]
    fn citations_follow_rank_order() {
        let retriever = retriever_with(&["east", "north", "mostly east"]);
        let results = retriever.retrieve("east", 2).expect("retrieve");
        let ids: Vec<&str> = results.iter().map(|r| r.citation_id.as_str()).collect();
        assert_eq!(ids, vec!["[1]", "[2]"]);
        assert_eq!(results[0].content, "east");
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[1].chunk_index, 2);
        assert!((results[0].cosine_similarity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn returns_min_of_k_and_total() {
        let retriever = retriever_with(&["east", "north", "mostly east"]);
        let results = retriever.retrieve("north", 10).expect("retrieve");
        assert_eq!(results.len(), 3);
        assert_eq!(results.last().map(|r| r.citation_id.as_str()), Some("[3]"));
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn empty_index_is_distinct_error() {
        let retriever = retriever_with(&[]);
        assert!(matches!(
            retriever.retrieve("anything", 4),
            Err(DocQaError::EmptyIndex)
        ));
    }

    #[test]
    fn rejects_zero_k_and_blank_query() {
        let retriever = retriever_with(&["east"]);
        assert!(matches!(retriever.retrieve("east", 0), Err(DocQaError::Input(_))));
        assert!(matches!(retriever.retrieve("  ", 1), Err(DocQaError::Input(_))));
    }
}
