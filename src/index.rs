//! Exact nearest-neighbor index over fixed-dimension vectors.
//!
//! Vectors live in one flat buffer; search is a full scan ranked by squared
//! Euclidean distance with ties resolved by insertion order.

use std::cmp::Ordering;

use crate::error::{DocQaError, Result};

/// One search hit: position in the index plus its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion position (joins back to the chunk store).
    pub index: usize,
    /// Squared Euclidean distance to the query.
    pub distance: f32,
}

/// Append-only, brute-force vector index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dim: Option<usize>,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Index with no vectors and no dimensionality yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index from a non-empty batch; `dim` is taken from the first vector.
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self> {
        if vectors.is_empty() {
            return Err(DocQaError::Input(
                "cannot build an index from an empty batch".into(),
            ));
        }
        let mut index = Self::new();
        index.add(vectors)?;
        Ok(index)
    }

    /// Reassembles an index from its flat parts (used when loading snapshots).
    pub(crate) fn from_parts(dim: Option<usize>, vectors: Vec<f32>) -> Result<Self> {
        match dim {
            None if vectors.is_empty() => Ok(Self::new()),
            None => Err(DocQaError::Input(
                "vectors present without a dimensionality".into(),
            )),
            Some(0) => Err(DocQaError::Input("dimensionality must be positive".into())),
            Some(d) if vectors.len() % d != 0 => Err(DocQaError::Input(format!(
                "{} floats do not divide into vectors of {d}",
                vectors.len()
            ))),
            Some(d) => Ok(Self {
                dim: Some(d),
                vectors,
            }),
        }
    }

    /// Appends vectors. The batch is checked in full before anything is stored.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let dim = match self.dim {
            Some(dim) => dim,
            None if first.is_empty() => {
                return Err(DocQaError::Input("vectors must not be empty".into()))
            }
            None => first.len(),
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(DocQaError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        self.dim = Some(dim);
        self.vectors.reserve(vectors.len() * dim);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Returns up to `k` nearest vectors, closest first.
    ///
    /// When `k` exceeds [`len`](Self::len) every stored vector is returned;
    /// callers detect saturation by comparing the result length with `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(DocQaError::Input("k must be at least 1".into()));
        }
        let Some(dim) = self.dim.filter(|_| !self.vectors.is_empty()) else {
            return Err(DocQaError::EmptyIndex);
        };
        if query.len() != dim {
            return Err(DocQaError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .vectors
            .chunks_exact(dim)
            .enumerate()
            .map(|(index, vector)| Neighbor {
                index,
                distance: squared_l2(query, vector),
            })
            .collect();
        scored.sort_by(compare_neighbors);
        scored.truncate(k);
        Ok(scored)
    }

    /// Vector at `index`, if present.
    pub fn vector(&self, index: usize) -> Option<&[f32]> {
        let dim = self.dim?;
        self.vectors.get(index * dim..(index + 1) * dim)
    }

    /// Number of stored vectors (`n_total`).
    pub fn len(&self) -> usize {
        match self.dim {
            Some(dim) if dim > 0 => self.vectors.len() / dim,
            _ => 0,
        }
    }

    /// True when no vectors are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality fixed by the first insertion.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.index.cmp(&b.index))
}

/// Squared Euclidean distance between equal-length slices.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
