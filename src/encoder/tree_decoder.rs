//! Attention layer fusing a short sequence of span vectors

use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::nn::{softmax_rows, LayerNorm, Linear};
use crate::{R2D2Error, Result};

/// Single-head self-attention block with a residual connection and layer norm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDecoder {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
}

impl TreeDecoder {
    /// Randomly initialised decoder over vectors of width `dim`
    pub fn new<R: Rng>(dim: usize, rng: &mut R) -> Self {
        TreeDecoder {
            query: Linear::new(dim, dim, rng),
            key: Linear::new(dim, dim, rng),
            value: Linear::new(dim, dim, rng),
            output: Linear::new(dim, dim, rng),
            norm: LayerNorm::new(dim),
        }
    }

    /// Width of the vectors
    pub fn dim(&self) -> usize {
        self.query.in_features()
    }

    /// Decode `[batch, seq, dim]` into the same shape
    pub fn forward(&self, inputs: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, seq, dim) = inputs.dim();
        if dim != self.dim() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "tree decoder expects width {}, got {}",
                self.dim(),
                dim
            )));
        }

        let scale = 1.0 / (dim as f32).sqrt();
        let mut outputs = Array3::zeros((batch, seq, dim));
        for (b, x) in inputs.axis_iter(Axis(0)).enumerate() {
            let x: Array2<f32> = x.to_owned();
            let q = self.query.forward(&x)?;
            let k = self.key.forward(&x)?;
            let v = self.value.forward(&x)?;

            let weights = softmax_rows(&(q.dot(&k.t()) * scale));
            let context = self.output.forward(&weights.dot(&v))?;
            let hidden = self.norm.forward(&(x + context));
            outputs.slice_mut(s![b, .., ..]).assign(&hidden);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_shape_preserved() {
        let mut rng = StdRng::seed_from_u64(5);
        let decoder = TreeDecoder::new(4, &mut rng);
        let inputs = Array3::from_shape_fn((2, 3, 4), |(b, t, d)| (b + t + d) as f32 * 0.1);
        let out = decoder.forward(&inputs).unwrap();
        assert_eq!(out.dim(), (2, 3, 4));
    }

    #[test]
    fn test_batch_rows_independent() {
        let mut rng = StdRng::seed_from_u64(5);
        let decoder = TreeDecoder::new(4, &mut rng);
        let inputs = Array3::from_shape_fn((2, 3, 4), |(b, t, d)| (b * 7 + t + d) as f32 * 0.1);
        let both = decoder.forward(&inputs).unwrap();
        let second = decoder.forward(&inputs.slice(s![1..2, .., ..]).to_owned()).unwrap();
        let diff = (&both.slice(s![1, .., ..]) - &second.slice(s![0, .., ..])).mapv(f32::abs).sum();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let decoder = TreeDecoder::new(4, &mut rng);
        assert!(decoder.forward(&Array3::zeros((1, 3, 5))).is_err());
    }
}
