//! Root-vector extraction from chart tables

use ndarray::Array2;
use crate::core::{CacheId, CacheSlot, ChartTable, TensorCache};
use crate::{R2D2Error, Result};

/// One row per table: the `Eij` slot of the table's root best node
///
/// Row order follows table order, which is the example order of the batch.
pub fn pool_root_vectors(tables: &[ChartTable], cache: &TensorCache) -> Result<Array2<f32>> {
    let root_cache_ids: Vec<CacheId> = tables
        .iter()
        .map(|table| table.root.best_node.cache_id)
        .collect();

    cache
        .gather(&root_cache_ids, &[CacheSlot::Eij])?
        .into_iter()
        .next()
        .ok_or_else(|| R2D2Error::ShapeMismatch("gather returned no slot".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChartCell, ChartNode};
    use ndarray::Array1;
    use proptest::prelude::*;

    fn table_for(cache_id: CacheId) -> ChartTable {
        let best_node = ChartNode { cache_id, start: 0, end: 0, split: None, log_p: 0.0 };
        ChartTable {
            root: ChartCell { start: 0, end: 0, best_node, candidates: 1 },
            tree: Vec::new(),
        }
    }

    #[test]
    fn test_pool_follows_table_order() {
        let mut cache = TensorCache::new(2);
        let ids: Vec<CacheId> = (0..3)
            .map(|v| cache.insert(Array1::from_elem(2, v as f32), 0.0).unwrap())
            .collect();
        let tables = vec![table_for(ids[2]), table_for(ids[0]), table_for(ids[1])];

        let pooled = pool_root_vectors(&tables, &cache).unwrap();
        assert_eq!(pooled.column(0).to_vec(), vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unpopulated_root_fails() {
        let cache = TensorCache::new(2);
        assert!(matches!(
            pool_root_vectors(&[table_for(0)], &cache),
            Err(R2D2Error::CacheMiss(0))
        ));
    }

    proptest! {
        #[test]
        fn pooled_row_i_is_root_of_table_i(order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()) {
            let mut cache = TensorCache::new(3);
            for v in 0..8 {
                cache.insert(Array1::from_elem(3, v as f32 * 1.5), -(v as f32)).unwrap();
            }
            let tables: Vec<ChartTable> = order.iter().map(|&id| table_for(id)).collect();

            let pooled = pool_root_vectors(&tables, &cache).unwrap();
            prop_assert_eq!(pooled.nrows(), tables.len());
            for (i, table) in tables.iter().enumerate() {
                let expected = cache.e_ij(table.root.best_node.cache_id).unwrap();
                prop_assert_eq!(pooled.row(i), expected);
            }
        }
    }
}
