//! Activations, softmax and cross-entropy over `ndarray` values

use ndarray::{Array1, Array2, ArrayView1, Axis};
use crate::{R2D2Error, Result};

const SQRT_2_OVER_PI: f32 = 0.797_884_6;
const GELU_COEFF: f32 = 0.044715;

/// GELU, tanh approximation
#[inline(always)]
pub fn gelu(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}

/// Log-softmax of a vector
pub fn log_softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return logits.to_owned();
    }
    let log_sum = logits.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
    logits.mapv(|x| x - log_sum)
}

/// Softmax along the last axis of a matrix
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
    probs
}

/// Mean cross-entropy of `logits` (`[batch, classes]`) against class indices
pub fn cross_entropy(logits: &Array2<f32>, labels: &[usize]) -> Result<f32> {
    let (batch, classes) = logits.dim();
    if batch != labels.len() {
        return Err(R2D2Error::ShapeMismatch(format!(
            "{} rows of logits for {} labels",
            batch,
            labels.len()
        )));
    }
    if batch == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for (row, &label) in logits.axis_iter(Axis(0)).zip(labels) {
        if label >= classes {
            return Err(R2D2Error::ShapeMismatch(format!(
                "label {} outside {} classes",
                label, classes
            )));
        }
        total -= log_softmax(row)[label];
    }
    Ok(total / batch as f32)
}
