//! Dense building blocks: linear projection, dropout and layer norm

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::{R2D2Error, Result};

/// Fully connected layer computing `x W + b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Weights, shape `[in_features, out_features]`
    weight: Array2<f32>,
    /// Bias, length `out_features`
    bias: Array1<f32>,
}

impl Linear {
    /// Randomly initialised layer
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let scale = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.gen_range(-1.0..1.0) * scale
        });
        Linear { weight, bias: Array1::zeros(out_features) }
    }

    /// Layer from explicit parameters
    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.ncols() != bias.len() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "weight has {} outputs, bias has {}",
                weight.ncols(),
                bias.len()
            )));
        }
        Ok(Linear { weight, bias })
    }

    /// Input width
    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Output width
    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    /// Apply to a batch of rows
    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_features() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "linear layer expects width {}, got {}",
                self.in_features(),
                x.ncols()
            )));
        }
        Ok(x.dot(&self.weight) + &self.bias)
    }

    /// Apply to a single vector whose width is known to match
    pub(crate) fn forward_vec(&self, x: ArrayView1<f32>) -> Array1<f32> {
        x.dot(&self.weight) + &self.bias
    }
}

/// Inverted dropout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Dropout with drop probability `p`
    pub fn new(p: f32) -> Self {
        Dropout { p }
    }

    /// Zero each element with probability `p` and rescale the rest
    pub fn apply<R: Rng>(&self, mut x: Array2<f32>, rng: &mut R) -> Array2<f32> {
        if self.p <= 0.0 {
            return x;
        }
        let keep = 1.0 - self.p;
        x.mapv_inplace(|v| if rng.gen::<f32>() < self.p { 0.0 } else { v / keep });
        x
    }
}

/// Row-wise layer normalisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    /// Identity-initialised norm over rows of width `dim`
    pub fn new(dim: usize) -> Self {
        LayerNorm {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps: 1e-5,
        }
    }

    /// Normalise each row
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut out = x.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            let mean = row.mean().unwrap_or(0.0);
            let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
            let inv = 1.0 / (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) * inv);
            row *= &self.gamma;
            row += &self.beta;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_linear_forward() {
        let layer = Linear::from_parts(array![[1.0, 0.0], [0.0, 2.0]], array![0.5, -0.5]).unwrap();
        let out = layer.forward(&array![[1.0, 1.0], [2.0, 0.0]]).unwrap();
        assert_eq!(out, array![[1.5, 1.5], [2.5, -0.5]]);
        assert!(layer.forward(&array![[1.0, 2.0, 3.0]]).is_err());
    }

    #[test]
    fn test_dropout_zero_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(Dropout::new(0.0).apply(x.clone(), &mut rng), x);
    }

    #[test]
    fn test_dropout_rescales_survivors() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = Dropout::new(0.5).apply(Array2::ones((8, 8)), &mut rng);
        assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_layer_norm_centres_rows() {
        let norm = LayerNorm::new(3);
        let out = norm.forward(&array![[1.0, 2.0, 3.0]]);
        assert!(out.row(0).sum().abs() < 1e-5);
    }
}
