//! Chart tables returned by the encoder and sampled derivations

use ndarray::{Array2, Array3};
use serde::{Serialize, Deserialize};
use super::cache::CacheId;

/// One candidate derivation of a span
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartNode {
    /// Key of this node's tensors in the cache
    pub cache_id: CacheId,
    /// First token of the span
    pub start: usize,
    /// Last token of the span (inclusive)
    pub end: usize,
    /// Last token of the left child, `None` for leaves
    pub split: Option<usize>,
    /// Accumulated log score
    pub log_p: f32,
}

impl ChartNode {
    /// Number of tokens covered
    pub fn width(&self) -> usize {
        self.end - self.start + 1
    }

    /// Check if this node is a single token
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// A chart cell: a span with its best-scoring derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCell {
    /// First token of the span
    pub start: usize,
    /// Last token of the span (inclusive)
    pub end: usize,
    /// Highest-scoring candidate
    pub best_node: ChartNode,
    /// Number of candidates considered
    pub candidates: usize,
}

/// Parse result of one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartTable {
    /// Cell spanning the whole row
    pub root: ChartCell,
    /// Spans of the recovered best tree in pre-order; empty unless recovery was requested
    pub tree: Vec<(usize, usize)>,
}

impl ChartTable {
    /// Number of tokens covered by the root
    pub fn len(&self) -> usize {
        self.root.end + 1 - self.root.start
    }

    /// Check if the table covers no tokens
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Top-down derivations of sampled trees, one row per tree
///
/// Step `s` of row `r` splits a span: `split_masks[(r, s, p)]` marks the
/// admissible positions of that span and `split_points[(r, s)]` the chosen one.
/// A position `p` splits between tokens `p` and `p + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledTrees {
    /// Admissible split positions, shape `[rows, steps, positions]`
    pub split_masks: Array3<bool>,
    /// Chosen split position, shape `[rows, steps]`
    pub split_points: Array2<usize>,
    /// Example each row was sampled for
    pub example_index: Vec<usize>,
}

/// One sampled tree as `(start, end, split)` steps in pre-order
pub type Derivation = Vec<(usize, usize, usize)>;

impl SampledTrees {
    /// Pack derivations for a batch whose rows have `seq_len` padded tokens
    pub fn from_derivations(derivations: &[(usize, Derivation)], seq_len: usize) -> Self {
        let positions = seq_len.saturating_sub(1);
        let rows = derivations.len();
        let mut split_masks = Array3::from_elem((rows, positions, positions), false);
        let mut split_points = Array2::zeros((rows, positions));
        let mut example_index = Vec::with_capacity(rows);

        for (row, (example, steps)) in derivations.iter().enumerate() {
            example_index.push(*example);
            for (step, &(start, end, split)) in steps.iter().enumerate().take(positions) {
                for p in start..end {
                    split_masks[(row, step, p)] = true;
                }
                split_points[(row, step)] = split;
            }
        }

        SampledTrees { split_masks, split_points, example_index }
    }

    /// Number of sampled trees
    pub fn num_trees(&self) -> usize {
        self.example_index.len()
    }

    /// Steps of a row that carry a split
    pub fn active_steps(&self, row: usize) -> Vec<usize> {
        let steps = self.split_masks.dim().1;
        (0..steps)
            .filter(|&s| self.split_masks.slice(ndarray::s![row, s, ..]).iter().any(|&m| m))
            .collect()
    }
}
