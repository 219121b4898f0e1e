//! Model configuration shared by the encoder, parser and classifier heads

use std::path::Path;
use serde::{Serialize, Deserialize};
use crate::{R2D2Error, Result};

/// Model configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct R2D2Config {
    /// Vocabulary size of the token embedding tables
    pub vocab_size: usize,
    /// Width of span embeddings
    pub hidden_size: usize,
    /// Width of the classifier's intermediate layer
    pub intermediate_size: usize,
    /// Dropout probability inside the classifier head
    pub hidden_dropout_prob: f32,
    /// Token id whose embedding marks the pairwise task
    pub pairwise_task_id: usize,
    /// Spans up to this width are filled exhaustively in the chart
    pub window_size: usize,
    /// Seed for parameter initialisation, dropout and tree sampling
    pub seed: u64,
}

impl R2D2Config {
    /// Small configuration used by tests and benches
    pub fn tiny(vocab_size: usize) -> Self {
        R2D2Config {
            vocab_size,
            hidden_size: 8,
            intermediate_size: 16,
            hidden_dropout_prob: 0.0,
            pairwise_task_id: vocab_size.saturating_sub(1),
            window_size: 2,
            seed: 7,
        }
    }

    /// Load a configuration from a JSON file and validate it
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: R2D2Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(R2D2Error::InvalidConfig("Vocabulary size must be positive".to_string()));
        }

        if self.hidden_size == 0 {
            return Err(R2D2Error::InvalidConfig("Hidden size must be positive".to_string()));
        }

        if self.intermediate_size == 0 {
            return Err(R2D2Error::InvalidConfig("Intermediate size must be positive".to_string()));
        }

        if !(0.0..1.0).contains(&self.hidden_dropout_prob) {
            return Err(R2D2Error::InvalidConfig(
                format!("Dropout probability {} outside [0, 1)", self.hidden_dropout_prob)
            ));
        }

        if self.pairwise_task_id >= self.vocab_size {
            return Err(R2D2Error::InvalidConfig(
                format!("Pairwise task id {} outside vocabulary of {}", self.pairwise_task_id, self.vocab_size)
            ));
        }

        if self.window_size == 0 {
            return Err(R2D2Error::InvalidConfig("Window size must be at least 1".to_string()));
        }

        Ok(())
    }
}

impl Default for R2D2Config {
    fn default() -> Self {
        R2D2Config {
            vocab_size: 30522,
            hidden_size: 768,
            intermediate_size: 3072,
            hidden_dropout_prob: 0.1,
            pairwise_task_id: 1,
            window_size: 4,
            seed: 42,
        }
    }
}
