//! Tree encoder interface and the pruned chart encoder

mod chart_encoder;
mod tree_decoder;

use ndarray::{Array2, Array3};
use crate::core::{ChartTable, SampledTrees, TensorCache, TokenBatch};
use crate::parser::MergeTrajectories;
use crate::Result;

pub use chart_encoder::ChartEncoder;
pub use tree_decoder::TreeDecoder;

/// Arguments of one encoder call
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// Tokens to encode
    pub batch: &'a TokenBatch,
    /// Merge guidance, one trajectory per row
    pub merge_trajectories: Option<&'a MergeTrajectories>,
    /// Trees to sample per row; 0 disables sampling
    pub sample_trees: usize,
    /// Recover the best tree of each table
    pub recover_tree: bool,
    /// Return the tensor cache with the output
    pub keep_tensor_cache: bool,
    /// Compute the bidirectional language-model loss
    pub lm_loss: bool,
}

impl<'a> EncodeRequest<'a> {
    /// Request with no guidance, no sampling, tree recovery, cache retention and LM loss
    pub fn new(batch: &'a TokenBatch) -> Self {
        EncodeRequest {
            batch,
            merge_trajectories: None,
            sample_trees: 0,
            recover_tree: true,
            keep_tensor_cache: true,
            lm_loss: true,
        }
    }

    /// Set merge guidance
    pub fn merge_trajectories(mut self, trajectories: Option<&'a MergeTrajectories>) -> Self {
        self.merge_trajectories = trajectories;
        self
    }

    /// Set number of sampled trees per row
    pub fn sample_trees(mut self, samples: usize) -> Self {
        self.sample_trees = samples;
        self
    }

    /// Set tree recovery
    pub fn recover_tree(mut self, recover: bool) -> Self {
        self.recover_tree = recover;
        self
    }

    /// Set cache retention
    pub fn keep_tensor_cache(mut self, keep: bool) -> Self {
        self.keep_tensor_cache = keep;
        self
    }

    /// Set LM loss computation
    pub fn lm_loss(mut self, lm_loss: bool) -> Self {
        self.lm_loss = lm_loss;
        self
    }
}

/// Result of one encoder call
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// One table per row, in row order
    pub tables: Vec<ChartTable>,
    /// Cache populated by this call, when retained
    pub tensor_cache: Option<TensorCache>,
    /// Bidirectional LM loss, 0 when not requested
    pub loss: f32,
    /// Sampled derivations, when requested
    pub sampled_trees: Option<SampledTrees>,
}

/// A latent-tree sentence encoder
pub trait TreeEncoder {
    /// Width of span embeddings
    fn hidden_size(&self) -> usize;

    /// Build chart tables for a batch
    fn encode(&mut self, request: &EncodeRequest<'_>) -> Result<EncoderOutput>;

    /// Compose each row strictly along its trajectory and return the root vectors
    fn compose_along(&self, batch: &TokenBatch, trajectories: &MergeTrajectories) -> Result<Array2<f32>>;

    /// Token embeddings, `[ids.len(), hidden_size]`
    fn embed(&self, ids: &[usize]) -> Result<Array2<f32>>;

    /// Fuse short sequences of vectors, `[batch, seq, dim] -> [batch, seq, dim]`
    fn tree_decode(&self, inputs: &Array3<f32>) -> Result<Array3<f32>>;

    /// Re-link shared parameters after loading
    fn tie_weights(&mut self) {}
}
