//! Classification models over a tree encoder and split parser
//!
//! Pooling takes the root vector of each chart table. Training combines a
//! parser-guided path and a force-encoded path into one loss; inference
//! returns softmax probabilities from either path.

mod checkpoint;
pub mod classification;
pub mod cross_sentence;
pub mod force;
pub mod objective;
pub mod pairwise;
pub mod pooling;

pub use classification::SentenceClassifier;
pub use cross_sentence::CrossSentenceClassifier;
pub use force::force_encode;
pub use objective::{Backbone, ForwardOptions, GuidedPass, LossBreakdown, ModelOutput};
pub use pairwise::PairwiseCombiner;
pub use pooling::pool_root_vectors;

/// Collaborators returning known values
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use ndarray::{Array1, Array2, Array3};
    use crate::core::{AtomSpans, ChartCell, ChartNode, ChartTable, SampledTrees, TensorCache, TokenBatch};
    use crate::encoder::{EncodeRequest, EncoderOutput, TreeEncoder};
    use crate::parser::{MergeTrajectories, SplitParser};
    use crate::Result;

    fn tag(tokens: &[usize]) -> f32 {
        tokens.first().copied().unwrap_or(0) as f32
    }

    /// Root vector of a row is filled with its first token id; forced roots add 0.5
    pub(crate) struct StubEncoder {
        dim: usize,
        lm_loss: f32,
        /// Whether each `encode` call carried merge trajectories
        pub guided_calls: Vec<bool>,
        /// `(sample_trees, lm_loss)` of each `encode` call
        pub requests: Vec<(usize, bool)>,
        /// Inputs of each `tree_decode` call; decoding is the identity
        pub decoded: RefCell<Vec<Array3<f32>>>,
    }

    impl StubEncoder {
        pub(crate) fn new(dim: usize, lm_loss: f32) -> Self {
            StubEncoder {
                dim,
                lm_loss,
                guided_calls: Vec::new(),
                requests: Vec::new(),
                decoded: RefCell::new(Vec::new()),
            }
        }
    }

    impl TreeEncoder for StubEncoder {
        fn hidden_size(&self) -> usize {
            self.dim
        }

        fn encode(&mut self, request: &EncodeRequest<'_>) -> Result<EncoderOutput> {
            self.guided_calls.push(request.merge_trajectories.is_some());
            self.requests.push((request.sample_trees, request.lm_loss));

            let batch = request.batch;
            let mut cache = TensorCache::new(self.dim);
            // a leading filler entry keeps cache ids distinct from row indices
            cache.insert(Array1::from_elem(self.dim, f32::NAN), 0.0)?;
            let mut tables = Vec::with_capacity(batch.batch_size());
            for r in 0..batch.batch_size() {
                let tokens = batch.tokens(r);
                let cache_id = cache.insert(Array1::from_elem(self.dim, tag(&tokens)), 0.0)?;
                let end = tokens.len().saturating_sub(1);
                let best_node = ChartNode { cache_id, start: 0, end, split: None, log_p: 0.0 };
                tables.push(ChartTable {
                    root: ChartCell { start: 0, end, best_node, candidates: 1 },
                    tree: Vec::new(),
                });
            }

            let sampled_trees = (request.sample_trees > 0)
                .then(|| SampledTrees::from_derivations(&[], batch.seq_len()));
            Ok(EncoderOutput {
                tables,
                tensor_cache: request.keep_tensor_cache.then_some(cache),
                loss: if request.lm_loss { self.lm_loss } else { 0.0 },
                sampled_trees,
            })
        }

        fn compose_along(&self, batch: &TokenBatch, _trajectories: &MergeTrajectories) -> Result<Array2<f32>> {
            Ok(Array2::from_shape_fn((batch.batch_size(), self.dim), |(r, _)| {
                tag(&batch.tokens(r)) + 0.5
            }))
        }

        fn embed(&self, ids: &[usize]) -> Result<Array2<f32>> {
            Ok(Array2::from_shape_fn((ids.len(), self.dim), |(r, _)| -(ids[r] as f32)))
        }

        fn tree_decode(&self, inputs: &Array3<f32>) -> Result<Array3<f32>> {
            self.decoded.borrow_mut().push(inputs.clone());
            Ok(inputs.clone())
        }
    }

    /// Left-branching trajectories and a constant split loss
    pub(crate) struct StubParser {
        kl: f32,
        pub parse_calls: Cell<usize>,
        pub loss_calls: Cell<usize>,
    }

    impl StubParser {
        pub(crate) fn new(kl: f32) -> Self {
            StubParser { kl, parse_calls: Cell::new(0), loss_calls: Cell::new(0) }
        }
    }

    impl SplitParser for StubParser {
        fn parse(&self, batch: &TokenBatch, atom_spans: Option<&[AtomSpans]>) -> Result<MergeTrajectories> {
            batch.check_atom_spans(atom_spans)?;
            self.parse_calls.set(self.parse_calls.get() + 1);
            Ok(batch
                .lengths()
                .into_iter()
                .map(|len| (0..len.saturating_sub(1)).collect())
                .collect())
        }

        fn split_loss(&self, _batch: &TokenBatch, _sampled: &SampledTrees) -> Result<f32> {
            self.loss_calls.set(self.loss_calls.get() + 1);
            Ok(self.kl)
        }
    }
}
