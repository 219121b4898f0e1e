//! Top-down split parser
//!
//! Each position between two adjacent tokens gets a split score. Splitting a
//! span top-down at its highest-scoring position yields the same tree as
//! merging positions bottom-up in ascending score order, so the merge
//! trajectory is simply the positions sorted by score.

use std::path::Path;
use ndarray::{s, Array1, Array2};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use crate::core::{AtomSpans, R2D2Config, SampledTrees, TokenBatch};
use crate::nn::{log_softmax, Linear};
use crate::utils::{load_json, save_json};
use crate::{R2D2Error, Result};
use super::{MergeTrajectories, SplitParser};

/// Split scorer `w . tanh(W [e_p; e_{p+1}] + b)` over token embeddings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopdownParser {
    /// Token embeddings, `[vocab, hidden]`
    embedding: Array2<f32>,
    /// Projection of adjacent token pairs, `2 * hidden -> hidden`
    pair: Linear,
    /// Output score vector
    scorer: Array1<f32>,
}

impl TopdownParser {
    /// Randomly initialised parser
    pub fn new(config: &R2D2Config) -> Result<Self> {
        config.validate()?;
        // offset so the parser does not mirror the encoder's initialisation
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let dim = config.hidden_size;

        let embedding = Array2::from_shape_fn((config.vocab_size, dim), |_| rng.gen_range(-0.1..0.1));
        let pair = Linear::new(2 * dim, dim, &mut rng);
        let scorer = Array1::from_shape_fn(dim, |_| rng.gen_range(-1.0..1.0) / (dim as f32).sqrt());

        Ok(TopdownParser { embedding, pair, scorer })
    }

    /// Load a saved parser
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let parser = load_json(path)?;
        log::info!("loaded top-down parser");
        Ok(parser)
    }

    /// Save parameters as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    /// Score of every split position of a row, length `tokens.len() - 1`
    pub fn split_scores(&self, tokens: &[usize]) -> Result<Array1<f32>> {
        let vocab = self.embedding.nrows();
        if let Some(&bad) = tokens.iter().find(|&&t| t >= vocab) {
            return Err(R2D2Error::InvalidToken(bad));
        }

        let dim = self.embedding.ncols();
        let positions = tokens.len().saturating_sub(1);
        let mut pairs = Array2::zeros((positions, 2 * dim));
        for p in 0..positions {
            pairs.slice_mut(s![p, ..dim]).assign(&self.embedding.row(tokens[p]));
            pairs.slice_mut(s![p, dim..]).assign(&self.embedding.row(tokens[p + 1]));
        }

        let hidden = self.pair.forward(&pairs)?.mapv(f32::tanh);
        Ok(hidden.dot(&self.scorer))
    }

    fn trajectory(&self, tokens: &[usize], atoms: &[(usize, usize)]) -> Result<Vec<usize>> {
        let mut scores = self.split_scores(tokens)?;
        for &(start, end) in atoms {
            if start > end || end >= tokens.len() {
                return Err(R2D2Error::ShapeMismatch(format!(
                    "atom span ({}, {}) outside a row of {} tokens",
                    start,
                    end,
                    tokens.len()
                )));
            }
            // positions inside the span merge before anything else
            scores.slice_mut(s![start..end]).fill(f32::NEG_INFINITY);
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
        Ok(order)
    }
}

impl SplitParser for TopdownParser {
    fn parse(&self, batch: &TokenBatch, atom_spans: Option<&[AtomSpans]>) -> Result<MergeTrajectories> {
        batch.check_atom_spans(atom_spans)?;
        (0..batch.batch_size())
            .into_par_iter()
            .map(|r| {
                let atoms = atom_spans.map_or(&[][..], |spans| spans[r].as_slice());
                self.trajectory(&batch.tokens(r), atoms)
            })
            .collect()
    }

    fn split_loss(&self, batch: &TokenBatch, sampled: &SampledTrees) -> Result<f32> {
        let scores: Vec<Array1<f32>> = (0..batch.batch_size())
            .into_par_iter()
            .map(|r| self.split_scores(&batch.tokens(r)))
            .collect::<Result<_>>()?;

        let mut total = 0.0;
        let mut steps = 0usize;
        for (row, &example) in sampled.example_index.iter().enumerate() {
            let row_scores = scores.get(example).ok_or_else(|| {
                R2D2Error::ShapeMismatch(format!(
                    "sampled tree for example {} of a batch of {}",
                    example,
                    batch.batch_size()
                ))
            })?;

            for step in sampled.active_steps(row) {
                let admissible: Vec<usize> = (0..row_scores.len())
                    .filter(|&p| sampled.split_masks[(row, step, p)])
                    .collect();
                let point = sampled.split_points[(row, step)];
                let target = admissible.iter().position(|&p| p == point).ok_or_else(|| {
                    R2D2Error::ShapeMismatch(format!(
                        "split point {} outside the admissible positions of step {}",
                        point, step
                    ))
                })?;

                let logits = Array1::from_iter(admissible.iter().map(|&p| row_scores[p]));
                total -= log_softmax(logits.view())[target];
                steps += 1;
            }
        }

        log::trace!("split loss over {} steps", steps);
        Ok(if steps == 0 { 0.0 } else { total / steps as f32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::validate_trajectory;

    fn parser() -> TopdownParser {
        TopdownParser::new(&R2D2Config::tiny(12)).unwrap()
    }

    #[test]
    fn test_trajectories_are_permutations() {
        let parser = parser();
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3, 4, 5], vec![6], vec![7, 8]]);
        let trajectories = parser.parse(&batch, None).unwrap();

        assert_eq!(trajectories.len(), 3);
        for (r, len) in batch.lengths().into_iter().enumerate() {
            assert!(validate_trajectory(&trajectories[r], len).is_ok());
        }
    }

    #[test]
    fn test_trajectory_follows_ascending_scores() {
        let parser = parser();
        let tokens = vec![1, 2, 3, 4, 5];
        let scores = parser.split_scores(&tokens).unwrap();
        let trajectory = parser.parse(&TokenBatch::from_rows(&[tokens]), None).unwrap().remove(0);
        for pair in trajectory.windows(2) {
            assert!(scores[pair[0]] <= scores[pair[1]]);
        }
    }

    #[test]
    fn test_atom_spans_merge_first() {
        let parser = parser();
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3, 4, 5, 6]]);
        let spans = vec![vec![(2, 4)]];
        let trajectory = parser.parse(&batch, Some(spans.as_slice())).unwrap().remove(0);

        let mut first_two = trajectory[..2].to_vec();
        first_two.sort();
        assert_eq!(first_two, vec![2, 3]);
    }

    #[test]
    fn test_bad_atom_span_rejected() {
        let parser = parser();
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3]]);
        let spans = vec![vec![(1, 3)]];
        assert!(parser.parse(&batch, Some(spans.as_slice())).is_err());
    }

    #[test]
    fn test_split_loss_prefers_parser_tree() {
        let parser = parser();
        let tokens = vec![1, 2, 3, 4];
        let scores = parser.split_scores(&tokens).unwrap();
        let batch = TokenBatch::from_rows(&[tokens]);

        let best = (0..3).max_by(|&a, &b| scores[a].total_cmp(&scores[b])).unwrap();
        let worst = (0..3).min_by(|&a, &b| scores[a].total_cmp(&scores[b])).unwrap();
        let agree = SampledTrees::from_derivations(&[(0, vec![(0, 3, best)])], 4);
        let disagree = SampledTrees::from_derivations(&[(0, vec![(0, 3, worst)])], 4);

        let low = parser.split_loss(&batch, &agree).unwrap();
        let high = parser.split_loss(&batch, &disagree).unwrap();
        assert!(low < high);
        assert!(low >= 0.0);
    }

    #[test]
    fn test_split_loss_without_steps_is_zero() {
        let parser = parser();
        let batch = TokenBatch::from_rows(&[vec![1]]);
        let sampled = SampledTrees::from_derivations(&[(0, vec![])], 1);
        assert_eq!(parser.split_loss(&batch, &sampled).unwrap(), 0.0);
    }
}
