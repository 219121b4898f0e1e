//! Span parser interface and the top-down split parser

mod topdown;

use crate::core::{AtomSpans, SampledTrees, TokenBatch};
use crate::{R2D2Error, Result};

pub use topdown::TopdownParser;

/// Per row, split positions `0..len-1` in merge order
///
/// A merge at position `p` joins the current span containing token `p` with
/// the one containing token `p + 1`.
pub type MergeTrajectories = Vec<Vec<usize>>;

/// A parser that guides the encoder's merges and learns from its sampled trees
pub trait SplitParser {
    /// Merge guidance for each row, keeping atom spans contiguous
    fn parse(&self, batch: &TokenBatch, atom_spans: Option<&[AtomSpans]>) -> Result<MergeTrajectories>;

    /// Loss of the parser's split distribution against sampled derivations
    fn split_loss(&self, batch: &TokenBatch, sampled: &SampledTrees) -> Result<f32>;
}

/// Check that `trajectory` is a permutation of the split positions of a `len`-token row
pub fn validate_trajectory(trajectory: &[usize], len: usize) -> Result<()> {
    let positions = len.saturating_sub(1);
    if trajectory.len() != positions {
        return Err(R2D2Error::InvalidTrajectory(format!(
            "{} merges for a row of {} tokens",
            trajectory.len(),
            len
        )));
    }

    let mut seen = vec![false; positions];
    for &p in trajectory {
        match seen.get_mut(p) {
            Some(flag) if !*flag => *flag = true,
            Some(_) => {
                return Err(R2D2Error::InvalidTrajectory(format!("position {} merged twice", p)));
            }
            None => {
                return Err(R2D2Error::InvalidTrajectory(format!(
                    "position {} outside a row of {} tokens",
                    p, len
                )));
            }
        }
    }
    Ok(())
}
