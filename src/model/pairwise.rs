//! Fusion of sentence-pair vectors behind a task marker

use ndarray::{s, Array2, Array3};
use crate::encoder::TreeEncoder;
use crate::{R2D2Error, Result};

/// Prepends a task-marker embedding to each pair and keeps the decoder output at the marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairwiseCombiner {
    task_id: usize,
}

impl PairwiseCombiner {
    /// Combiner whose marker is the embedding of `task_id`
    pub fn new(task_id: usize) -> Self {
        PairwiseCombiner { task_id }
    }

    /// Token id of the task marker
    pub fn task_id(&self) -> usize {
        self.task_id
    }

    /// Reshape `[2B, D]` to `[B, 2, D]`; rows `2b` and `2b + 1` become pair `b`
    pub fn pair_up(pooled: &Array2<f32>) -> Result<Array3<f32>> {
        let (rows, dim) = pooled.dim();
        if rows % 2 != 0 {
            return Err(R2D2Error::ShapeMismatch(format!(
                "{} pooled rows cannot form sentence pairs",
                rows
            )));
        }
        Ok(Array3::from_shape_fn((rows / 2, 2, dim), |(b, p, d)| pooled[(2 * b + p, d)]))
    }

    /// Fused `[B, D]` vectors from `[2B, D]` pooled sentence vectors
    pub fn combine<E: TreeEncoder + ?Sized>(&self, encoder: &E, pooled: &Array2<f32>) -> Result<Array2<f32>> {
        let pairs = Self::pair_up(pooled)?;
        let (batch, _, dim) = pairs.dim();

        let marker = encoder.embed(&vec![self.task_id; batch])?;
        if marker.dim() != (batch, dim) {
            return Err(R2D2Error::ShapeMismatch(format!(
                "task embedding {:?}, expected {:?}",
                marker.dim(),
                (batch, dim)
            )));
        }

        let mut inputs = Array3::zeros((batch, 3, dim));
        inputs.slice_mut(s![.., 0, ..]).assign(&marker);
        inputs.slice_mut(s![.., 1.., ..]).assign(&pairs);

        let outputs = encoder.tree_decode(&inputs)?;
        if outputs.dim() != inputs.dim() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "tree decoder returned {:?} for inputs {:?}",
                outputs.dim(),
                inputs.dim()
            )));
        }
        Ok(outputs.slice(s![.., 0, ..]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::StubEncoder;
    use ndarray::array;

    #[test]
    fn test_pair_up_keeps_pair_identity() {
        let pooled = array![[0.0, 0.5], [1.0, 1.5], [2.0, 2.5], [3.0, 3.5]];
        let pairs = PairwiseCombiner::pair_up(&pooled).unwrap();

        assert_eq!(pairs.dim(), (2, 2, 2));
        assert_eq!(pairs.slice(s![1, 0, ..]), pooled.row(2));
        assert_eq!(pairs.slice(s![1, 1, ..]), pooled.row(3));
    }

    #[test]
    fn test_odd_rows_rejected() {
        let pooled = Array2::<f32>::zeros((3, 2));
        assert!(matches!(PairwiseCombiner::pair_up(&pooled), Err(R2D2Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_marker_leads_decoder_input() {
        let encoder = StubEncoder::new(2, 0.0);
        let combiner = PairwiseCombiner::new(9);
        let pooled = array![[1.0, 1.0], [2.0, 2.0]];

        let fused = combiner.combine(&encoder, &pooled).unwrap();
        let decoded = encoder.decoded.borrow();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].dim(), (1, 3, 2));
        assert_eq!(decoded[0].slice(s![0, .., 0]).to_vec(), vec![-9.0, 1.0, 2.0]);
        // stub decoder is the identity, so position 0 is the marker
        assert_eq!(fused, array![[-9.0, -9.0]]);
    }
}
