//! Exact L2 search engine.

use super::Embeddings;

/// Handle returned for result slots with no neighbor.
pub const NO_MATCH: i64 = -1;

/// A nearest-neighbor structure addressed by sequential integer handles.
///
/// Handles are assigned in insertion order starting at 0. `search` returns
/// at most `k` handles per query row. Engines with fixed-width result slots
/// may fill unused ones with [`NO_MATCH`].
pub trait AnnIndex: Send + Sync {
    /// Width of every stored vector.
    fn dims(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends every row of `embeddings`. Callers guarantee matching dims.
    fn add(&mut self, embeddings: &Embeddings);

    /// Returns up to `k` closest handles for every query row, nearest first.
    fn search(&self, queries: &Embeddings, k: usize) -> Vec<Vec<i64>>;
}

/// Brute-force index comparing every query with every stored vector.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self { dims, data: Vec::new() }
    }

    /// Builder used by [`super::VectorStore::new`].
    #[must_use]
    pub fn boxed(dims: usize) -> Box<dyn AnnIndex> {
        Box::new(Self::new(dims))
    }
}

impl AnnIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.data.len().checked_div(self.dims).unwrap_or(0)
    }

    fn add(&mut self, embeddings: &Embeddings) {
        debug_assert_eq!(embeddings.dims(), self.dims);
        self.data.extend_from_slice(embeddings.as_slice());
    }

    fn search(&self, queries: &Embeddings, k: usize) -> Vec<Vec<i64>> {
        queries
            .iter_rows()
            .map(|query| {
                let mut scored: Vec<(f32, usize)> = self
                    .data
                    .chunks_exact(self.dims)
                    .enumerate()
                    .map(|(handle, stored)| (squared_l2(query, stored), handle))
                    .collect();
                scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

                scored
                    .into_iter()
                    .take(k)
                    .map(|(_, handle)| i64::try_from(handle).unwrap_or(NO_MATCH))
                    .collect()
            })
            .collect()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[f32]) -> Embeddings {
        Embeddings::from_rows(values.iter().map(|v| vec![*v; 10]).collect()).unwrap()
    }

    #[test]
    fn test_nearest_first() {
        let mut index = FlatIndex::new(10);
        index.add(&rows(&[0.0, 5.0, 1.0]));
        assert_eq!(index.len(), 3);

        let result = index.search(&rows(&[0.9]), 3);
        assert_eq!(result, vec![vec![2, 0, 1]]);
    }

    #[test]
    fn test_k_beyond_len_returns_every_handle() {
        let mut index = FlatIndex::new(10);
        index.add(&rows(&[1.0]));

        let result = index.search(&rows(&[1.0, 3.0]), 3);
        assert_eq!(result, vec![vec![0], vec![0]]);
    }

    #[test]
    fn test_huge_k_does_not_allocate_k_slots() {
        let mut index = FlatIndex::new(10);
        index.add(&rows(&[1.0, 2.0]));

        let result = index.search(&rows(&[2.0]), usize::MAX);
        assert_eq!(result, vec![vec![1, 0]]);
    }

    #[test]
    fn test_ties_break_by_handle() {
        let mut index = FlatIndex::new(10);
        index.add(&rows(&[2.0, 0.0, 2.0]));

        let result = index.search(&rows(&[1.0]), 2);
        assert_eq!(result, vec![vec![0, 1]]);
    }

    #[test]
    fn test_empty_index() {
        let index = FlatIndex::new(10);
        assert!(index.is_empty());
        assert_eq!(index.search(&rows(&[1.0]), 1), vec![Vec::<i64>::new()]);
    }
}
