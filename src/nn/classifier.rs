//! Feed-forward classification head over pooled span vectors

use ndarray::Array2;
use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::core::R2D2Config;
use crate::Result;
use super::layers::{Dropout, Linear};
use super::ops::gelu;

/// `linear -> GELU -> dropout -> linear`, producing per-class logits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierHead {
    dense: Linear,
    dropout: Dropout,
    out: Linear,
}

impl ClassifierHead {
    /// Head mapping `hidden_size` vectors to `label_num` logits
    pub fn new<R: Rng>(config: &R2D2Config, label_num: usize, rng: &mut R) -> Self {
        ClassifierHead {
            dense: Linear::new(config.hidden_size, config.intermediate_size, rng),
            dropout: Dropout::new(config.hidden_dropout_prob),
            out: Linear::new(config.intermediate_size, label_num, rng),
        }
    }

    /// Number of classes
    pub fn label_num(&self) -> usize {
        self.out.out_features()
    }

    /// Evaluation-mode logits, `[batch, label_num]`
    pub fn forward(&self, pooled: &Array2<f32>) -> Result<Array2<f32>> {
        let hidden = self.dense.forward(pooled)?.mapv(gelu);
        self.out.forward(&hidden)
    }

    /// Training-mode logits with dropout active
    pub fn forward_train<R: Rng>(&self, pooled: &Array2<f32>, rng: &mut R) -> Result<Array2<f32>> {
        let hidden = self.dense.forward(pooled)?.mapv(gelu);
        let hidden = self.dropout.apply(hidden, rng);
        self.out.forward(&hidden)
    }
}
