//! # fast-r2d2: latent-tree sentence classification
//!
//! Classification heads stacked on a latent-tree sentence encoder with an
//! auxiliary top-down span parser. A forward pass either produces a training
//! loss or per-class probabilities.
//!
//! ## Features
//!
//! - **Core data**: token batches, chart tables and a tensor cache keyed by cell ids
//! - **Encoder**: pruned chart encoder with merge guidance, tree sampling and a bidirectional LM loss
//! - **Parser**: top-down split scorer emitting merge trajectories
//! - **Models**: single-sentence and cross-sentence classifiers with a dual-path objective

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Configuration, batches, tensor cache and chart tables
pub mod core;

/// Dense layers and numeric helpers
pub mod nn;

/// Tree encoder interface and the chart encoder
pub mod encoder;

/// Span parser interface and the top-down parser
pub mod parser;

/// Pooling, objective composition and classification models
pub mod model;

/// Utility functions and helpers
pub mod utils;

// Re-export commonly used types
pub use core::{R2D2Config, TokenBatch, PairBatch, TensorCache, CacheSlot, ChartTable};
pub use encoder::{TreeEncoder, ChartEncoder, EncodeRequest, EncoderOutput};
pub use parser::{SplitParser, TopdownParser, MergeTrajectories};
pub use model::{SentenceClassifier, CrossSentenceClassifier, LossBreakdown, ModelOutput, ForwardOptions};

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum R2D2Error {
    /// Force encoding was requested at inference while the parser is disabled
    #[error("Force encoding is not supported when the parser is disabled")]
    ForceEncodingWithoutParser,

    /// Tensor shapes or batch sizes disagree
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A cache id was gathered before being populated
    #[error("Cache miss: id {0} was never populated")]
    CacheMiss(usize),

    /// A merge trajectory is not a permutation of the row's split positions
    #[error("Invalid merge trajectory: {0}")]
    InvalidTrajectory(String),

    /// Token id outside the vocabulary
    #[error("Token id {0} is out of vocabulary")]
    InvalidToken(usize),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for the library
pub type Result<T> = std::result::Result<T, R2D2Error>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        core::{R2D2Config, TokenBatch, PairBatch, TensorCache, CacheSlot, ChartTable, SampledTrees},
        encoder::{TreeEncoder, ChartEncoder, EncodeRequest},
        parser::{SplitParser, TopdownParser},
        model::{SentenceClassifier, CrossSentenceClassifier, ForwardOptions, ModelOutput, LossBreakdown},
        Result, R2D2Error,
    };
}
