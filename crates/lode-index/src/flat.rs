//! Exact inner-product index with brute-force search.
//!
//! Vectors are stored row-major in one contiguous buffer. Callers are
//! expected to L2-normalize before inserting and querying, which makes the
//! inner product equal to cosine similarity. Search is O(n * d).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use lode_core::error::{LodeError, Result};

use crate::atomic;

/// Flat inner-product index of fixed dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index for `dimension`-length vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors stored.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a vector and return its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(LodeError::Corruption {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let position = self.len();
        self.data.extend_from_slice(vector);
        Ok(position)
    }

    /// Drop every vector at or after position `len`.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension);
    }

    /// Top-`k` positions by inner product with `query`, best first.
    ///
    /// `k` is clamped to the number of stored vectors. Equal scores keep
    /// insertion order, so the earlier-inserted position ranks first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, usize)> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, usize)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| (dot(query, row), position))
            .collect();

        // Stable sort keeps ascending position among ties.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k.min(self.len()));
        scored
    }

    /// Write the index to `path` via a temp file and rename, so readers only
    /// ever see a complete blob.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic::write_atomically(path, |writer| Ok(bincode::serialize_into(writer, self)?))
    }

    /// Load an index previously written by [`FlatIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let index: FlatIndex = bincode::deserialize_from(BufReader::new(file))?;
        if index.dimension == 0 || index.data.len() % index.dimension != 0 {
            return Err(LodeError::CorruptStore(format!(
                "index file {} has a ragged vector buffer",
                path.display()
            )));
        }
        Ok(index)
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale `vector` to unit length in place. A zero vector is left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// Scale `vector` by `1 / (norm + eps)`, which never divides by zero.
pub fn normalize_with_epsilon(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let scale = 1.0 / (norm + 1e-12);
    for val in vector.iter_mut() {
        *val *= scale;
    }
}
