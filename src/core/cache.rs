//! Tensor cache holding per-cell intermediate vectors

use ndarray::{Array1, Array2, ArrayView1};
use crate::{R2D2Error, Result};

/// Integer key of a chart cell's cached tensors
pub type CacheId = usize;

/// Named slots stored for every cache id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// Pooled span embedding, width = hidden size
    Eij,
    /// Span log score, width 1
    LogPij,
}

/// Per-forward-pass store of cell tensors, addressed by [`CacheId`]
///
/// Ids are handed out densely in insertion order.
#[derive(Debug, Clone)]
pub struct TensorCache {
    /// Width of the `Eij` slot
    dim: usize,
    /// `Eij` rows, one per id
    e_ij: Vec<Array1<f32>>,
    /// `LogPij` values, one per id
    log_p_ij: Vec<f32>,
}

impl TensorCache {
    /// Create an empty cache for span embeddings of width `dim`
    pub fn new(dim: usize) -> Self {
        TensorCache {
            dim,
            e_ij: Vec::new(),
            log_p_ij: Vec::new(),
        }
    }

    /// Create an empty cache with room for `capacity` ids
    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        TensorCache {
            dim,
            e_ij: Vec::with_capacity(capacity),
            log_p_ij: Vec::with_capacity(capacity),
        }
    }

    /// Width of the `Eij` slot
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of populated ids
    pub fn len(&self) -> usize {
        self.e_ij.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.e_ij.is_empty()
    }

    /// Store a cell and return its id
    pub fn insert(&mut self, e_ij: Array1<f32>, log_p_ij: f32) -> Result<CacheId> {
        if e_ij.len() != self.dim {
            return Err(R2D2Error::ShapeMismatch(format!(
                "cache slot Eij has width {}, got {}",
                self.dim,
                e_ij.len()
            )));
        }
        let id = self.e_ij.len();
        self.e_ij.push(e_ij);
        self.log_p_ij.push(log_p_ij);
        Ok(id)
    }

    /// Borrow the span embedding of one id
    pub fn e_ij(&self, id: CacheId) -> Result<ArrayView1<'_, f32>> {
        self.e_ij.get(id).map(|row| row.view()).ok_or(R2D2Error::CacheMiss(id))
    }

    /// Log score of one id
    pub fn log_p_ij(&self, id: CacheId) -> Result<f32> {
        self.log_p_ij.get(id).copied().ok_or(R2D2Error::CacheMiss(id))
    }

    /// Batched read: one matrix per requested slot, rows in the order of `ids`
    pub fn gather(&self, ids: &[CacheId], slots: &[CacheSlot]) -> Result<Vec<Array2<f32>>> {
        log::trace!("gathering {} ids over {} slots", ids.len(), slots.len());
        if let Some(&missing) = ids.iter().find(|&&id| id >= self.len()) {
            return Err(R2D2Error::CacheMiss(missing));
        }

        let gathered = slots
            .iter()
            .map(|slot| match slot {
                CacheSlot::Eij => {
                    let mut out = Array2::zeros((ids.len(), self.dim));
                    for (row, &id) in ids.iter().enumerate() {
                        out.row_mut(row).assign(&self.e_ij[id]);
                    }
                    out
                }
                CacheSlot::LogPij => {
                    Array2::from_shape_fn((ids.len(), 1), |(row, _)| self.log_p_ij[ids[row]])
                }
            })
            .collect();

        Ok(gathered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn filled_cache() -> TensorCache {
        let mut cache = TensorCache::new(2);
        cache.insert(array![1.0, 1.5], -0.5).unwrap();
        cache.insert(array![2.0, 2.5], -1.0).unwrap();
        cache.insert(array![3.0, 3.5], -2.0).unwrap();
        cache
    }

    #[test]
    fn test_gather_preserves_id_order() {
        let cache = filled_cache();
        let out = cache.gather(&[2, 0, 1], &[CacheSlot::Eij]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], array![[3.0, 3.5], [1.0, 1.5], [2.0, 2.5]]);
    }

    #[test]
    fn test_gather_multiple_slots_in_slot_order() {
        let cache = filled_cache();
        let out = cache.gather(&[1, 1], &[CacheSlot::LogPij, CacheSlot::Eij]).unwrap();
        assert_eq!(out[0], array![[-1.0], [-1.0]]);
        assert_eq!(out[1], array![[2.0, 2.5], [2.0, 2.5]]);
    }

    #[test]
    fn test_unpopulated_id_is_a_cache_miss() {
        let cache = filled_cache();
        assert!(matches!(cache.gather(&[0, 3], &[CacheSlot::Eij]), Err(R2D2Error::CacheMiss(3))));
        assert!(cache.e_ij(9).is_err());
    }

    #[test]
    fn test_insert_checks_width() {
        let mut cache = TensorCache::new(3);
        assert!(cache.insert(array![1.0], 0.0).is_err());
        assert!(cache.is_empty());
    }
}
