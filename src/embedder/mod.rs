//! Embedding gateway: turns text into unit vectors through a pluggable backend.

pub mod hashing;
pub mod openai;
pub mod pool;

use std::sync::Arc;

use crate::error::{DocQaError, Result};

/// A text embedding backend.
///
/// Backends return raw vectors; [`EmbeddingGateway`] owns batching,
/// normalization and shape checks.
pub trait Embedder: Send + Sync {
    /// Identifier of the model that produced the vectors.
    fn model_name(&self) -> &str;

    /// Largest batch the backend accepts per call.
    fn batch_size(&self) -> usize {
        usize::MAX
    }

    /// Embeds `inputs`, one vector per input in the same order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic text → unit-vector mapping over one fixed model.
#[derive(Clone)]
pub struct EmbeddingGateway {
    backend: Arc<dyn Embedder>,
}

impl EmbeddingGateway {
    /// Wraps a concrete backend.
    pub fn new<E: Embedder + 'static>(backend: E) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Wraps an already shared backend.
    pub fn from_shared(backend: Arc<dyn Embedder>) -> Self {
        Self { backend }
    }

    /// Model identifier of the wrapped backend.
    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Embeds every text, splitting into backend-sized requests and keeping order.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(DocQaError::Input("no texts provided for embedding".into()));
        }
        let batch_size = self.backend.batch_size().max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(batch_size) {
            let embedded = self.backend.embed_batch(group)?;
            if embedded.len() != group.len() {
                return Err(DocQaError::Embedding(format!(
                    "backend returned {} vectors for {} inputs",
                    embedded.len(),
                    group.len()
                )));
            }
            vectors.extend(embedded);
        }

        let dim = vectors[0].len();
        if dim == 0 {
            return Err(DocQaError::Embedding("backend returned empty vectors".into()));
        }
        for vector in vectors.iter_mut() {
            if vector.len() != dim {
                return Err(DocQaError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            l2_normalize(vector)?;
        }
        tracing::debug!(
            model = self.model_name(),
            count = vectors.len(),
            dim,
            "embedded batch"
        );
        Ok(vectors)
    }

    /// Embeds a single text.
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| DocQaError::Embedding("backend returned no embedding".into()))
    }
}

/// Scales `vector` to unit L2 norm in place.
pub fn l2_normalize(vector: &mut [f32]) -> Result<()> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(DocQaError::Embedding(format!(
            "cannot normalize vector with norm {norm}"
        )));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            assert!(inputs.len() <= 2);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|text| vec![text.len() as f32, 1.0])
                .collect())
        }
    }

    #[test]
    fn splits_batches_and_normalizes() {
        let backend = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gateway = EmbeddingGateway::from_shared(backend.clone());
        let vectors = gateway
            .embed_batch(&["a", "bbb", "cc", "dddd", "e"])
            .expect("embed");
        assert_eq!(vectors.len(), 5);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        for vector in &vectors {
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
        // order is preserved: longer text → larger first component
        assert!(vectors[3][0] > vectors[0][0]);
    }

    #[test]
    fn empty_batch_is_input_error() {
        let gateway = EmbeddingGateway::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        assert!(matches!(gateway.embed_batch(&[]), Err(DocQaError::Input(_))));
    }

    #[test]
    fn zero_vectors_cannot_be_normalized() {
        let mut zero = vec![0.0, 0.0];
        assert!(matches!(
            l2_normalize(&mut zero),
            Err(DocQaError::Embedding(_))
        ));
    }
}
