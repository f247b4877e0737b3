//! Exact-cosine dense-vector index.
//!
//! Rows live in one contiguous `Vec<f32>` (`rows * dim`) for cache-friendly,
//! SIMD-ready scans. Every stored row is L2-normalized at insert time, so a
//! dot product against a normalized query is the cosine similarity. Top-K is
//! a single pass over the matrix with a bounded min-heap and no per-row
//! allocation.

use std::collections::HashMap;

use crate::bm25::top_k_by_score;

/// Dense index mapping string ids to unit-norm embedding rows.
#[derive(Default)]
pub struct VectorIndex {
    /// Row-major storage, `ids.len() * dim` floats.
    data: Vec<f32>,
    /// Row index -> id, parallel to `data`.
    ids: Vec<String>,
    /// id -> row index.
    rows: HashMap<String, usize>,
    /// Fixed at first insertion; 0 while empty.
    dim: usize,
}

/// Scale `vec` to unit length in place. A zero vector is left untouched.
fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Copy `vec` into a `dim`-sized normalized buffer. Short inputs are
    /// zero-padded, long inputs truncated.
    fn fitted(&self, vec: &[f32]) -> Vec<f32> {
        let mut row = vec![0.0f32; self.dim];
        let n = vec.len().min(self.dim);
        row[..n].copy_from_slice(&vec[..n]);
        normalize(&mut row);
        row
    }

    /// Append a new row. The first insertion fixes the index dimension.
    pub fn add(&mut self, id: &str, vec: &[f32]) {
        if self.dim == 0 {
            self.dim = vec.len();
        }
        if self.dim == 0 {
            return;
        }
        let row = self.fitted(vec);
        self.rows.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        self.data.extend_from_slice(&row);
    }

    /// Rewrite an existing row in place, or append when the id is new.
    pub fn update(&mut self, id: &str, vec: &[f32]) {
        match self.rows.get(id).copied() {
            Some(row) => {
                let fitted = self.fitted(vec);
                let start = row * self.dim;
                self.data[start..start + self.dim].copy_from_slice(&fitted);
            }
            None => self.add(id, vec),
        }
    }

    /// Swap-remove the row for `id`. Idempotent on unknown ids.
    pub fn remove(&mut self, id: &str) {
        let Some(row) = self.rows.remove(id) else {
            return;
        };
        let last = self.ids.len() - 1;
        if row != last {
            let (head, tail) = self.data.split_at_mut(last * self.dim);
            head[row * self.dim..(row + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
            self.ids.swap(row, last);
            self.rows.insert(self.ids[row].clone(), row);
        }
        self.ids.pop();
        self.data.truncate(last * self.dim);
    }

    /// Exact cosine top-K: normalize the query, dot it against every row in
    /// a single stride-`dim` pass with no per-row allocation, keep the best
    /// `k`, sorted descending.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(String, f64)> {
        if k == 0 || self.ids.is_empty() {
            return Vec::new();
        }
        let q = self.fitted(query);
        let scores = (0..self.ids.len()).map(|row| {
            let start = row * self.dim;
            let dot: f32 =
                q.iter().zip(&self.data[start..start + self.dim]).map(|(a, b)| a * b).sum();
            (row, dot as f64)
        });
        top_k_by_score(scores, k)
            .into_iter()
            .map(|(row, score)| (self.ids[row].clone(), score))
            .collect()
    }
}
