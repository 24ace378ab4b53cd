//! Offline feature-hashing embedder.
//!
//! Maps word unigrams and character trigrams into a fixed number of signed
//! buckets via CRC32. Bit-for-bit reproducible across runs and platforms,
//! which makes it the backend of choice for tests and air-gapped setups.

use crate::error::{DocQaError, Result};

use super::{Embedder, EmbeddingGateway};

/// Dimensionality used when none is configured.
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-features embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    /// Builds an embedder producing `dimensions`-long vectors.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(DocQaError::Input(
                "hashing embedder needs at least one dimension".into(),
            ));
        }
        Ok(Self {
            dimensions,
            model: format!("hashing-{dimensions}"),
        })
    }

    /// Output dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            self.accumulate(&mut vector, word.as_bytes(), 1.0);

            let padded: Vec<char> = std::iter::once('#')
                .chain(word.chars())
                .chain(std::iter::once('#'))
                .collect();
            let mut buf = String::new();
            for window in padded.windows(3) {
                buf.clear();
                buf.extend(window.iter());
                self.accumulate(&mut vector, buf.as_bytes(), TRIGRAM_WEIGHT);
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = crc32fast::hash(feature);
        let bucket = (hash as usize >> 1) % self.dimensions;
        let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
            model: format!("hashing-{DEFAULT_HASHING_DIMENSIONS}"),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}

impl EmbeddingGateway {
    /// Gateway over the default offline hashing backend.
    pub fn default_hashing() -> Self {
        Self::new(HashingEmbedder::default())
    }
}
