//! Pruned chart encoder
//!
//! Spans up to `window_size` tokens are filled exhaustively, CKY style. Wider
//! spans only appear when two adjacent top-level spans are merged, either in
//! the order given by a merge trajectory or greedily by score. A merged cell
//! considers every split whose two halves are already in the chart, so the
//! chart path can still disagree with the guidance inside the window.

use std::collections::HashMap;
use std::path::Path;
use ndarray::{s, Array1, Array2, Array3, ArrayView1};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use crate::core::{
    CacheId, ChartCell, ChartNode, ChartTable, Derivation, R2D2Config, SampledTrees, TensorCache,
    TokenBatch,
};
use crate::nn::{log_softmax, Linear};
use crate::parser::{validate_trajectory, MergeTrajectories};
use crate::utils::{load_json, save_json};
use crate::{R2D2Error, Result};
use super::tree_decoder::TreeDecoder;
use super::{EncodeRequest, EncoderOutput, TreeEncoder};

/// Inclusive token span
type Span = (usize, usize);

#[derive(Debug, Clone)]
struct Candidate {
    split: Option<usize>,
    e_ij: Array1<f32>,
    log_p: f32,
}

#[derive(Debug, Clone)]
struct Cell {
    candidates: Vec<Candidate>,
    best: usize,
}

impl Cell {
    fn leaf(e_ij: Array1<f32>) -> Self {
        Cell {
            candidates: vec![Candidate { split: None, e_ij, log_p: 0.0 }],
            best: 0,
        }
    }

    fn from_candidates(candidates: Vec<Candidate>) -> Self {
        let mut best = 0;
        for (i, candidate) in candidates.iter().enumerate() {
            if candidate.log_p > candidates[best].log_p {
                best = i;
            }
        }
        Cell { candidates, best }
    }

    fn best(&self) -> &Candidate {
        &self.candidates[self.best]
    }
}

/// Chart of one row, before its tensors are written to the cache
#[derive(Debug)]
struct RowChart {
    len: usize,
    cells: HashMap<Span, Cell>,
    /// Creation order, which fixes cache id assignment
    order: Vec<Span>,
}

impl RowChart {
    fn new(len: usize) -> Self {
        RowChart {
            len,
            cells: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn root_span(&self) -> Span {
        (0, self.len - 1)
    }

    fn insert(&mut self, span: Span, cell: Cell) {
        if self.cells.insert(span, cell).is_none() {
            self.order.push(span);
        }
    }

    fn contains(&self, span: Span) -> bool {
        self.cells.contains_key(&span)
    }

    fn num_nodes(&self) -> usize {
        self.cells.values().map(|c| c.candidates.len()).sum()
    }

    fn widest_ending_at(&self, end: usize) -> Option<&Cell> {
        (0..=end).find_map(|start| self.cells.get(&(start, end)))
    }

    fn widest_starting_at(&self, start: usize) -> Option<&Cell> {
        (start..self.len).rev().find_map(|end| self.cells.get(&(start, end)))
    }

    /// Spans of the best tree in pre-order
    fn best_tree(&self) -> Vec<Span> {
        let mut spans = Vec::with_capacity(2 * self.len - 1);
        let mut stack = vec![self.root_span()];
        while let Some(span) = stack.pop() {
            spans.push(span);
            if let Some(k) = self.cells.get(&span).and_then(|c| c.best().split) {
                stack.push((k + 1, span.1));
                stack.push((span.0, k));
            }
        }
        spans
    }

    /// Draw a tree top-down, picking each cell's candidate by `softmax(log_p)`
    fn sample_derivation<R: Rng>(&self, rng: &mut R) -> Derivation {
        let mut steps = Vec::with_capacity(self.len.saturating_sub(1));
        let mut stack = vec![self.root_span()];
        while let Some(span) = stack.pop() {
            let Some(cell) = self.cells.get(&span) else { continue };
            let max = cell.candidates.iter().map(|c| c.log_p).fold(f32::NEG_INFINITY, f32::max);
            let weights: Vec<f32> = cell.candidates.iter().map(|c| (c.log_p - max).exp()).collect();
            let mut draw = rng.gen::<f32>() * weights.iter().sum::<f32>();
            let mut chosen = weights.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if draw < *w {
                    chosen = i;
                    break;
                }
                draw -= w;
            }

            if let Some(k) = cell.candidates[chosen].split {
                steps.push((span.0, span.1, k));
                stack.push((k + 1, span.1));
                stack.push((span.0, k));
            }
        }
        steps
    }
}

fn detached_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

fn concat_pair(left: ArrayView1<f32>, right: ArrayView1<f32>) -> Array1<f32> {
    let dim = left.len();
    let mut joined = Array1::zeros(dim + right.len());
    joined.slice_mut(s![..dim]).assign(&left);
    joined.slice_mut(s![dim..]).assign(&right);
    joined
}

/// Chart encoder with a tied bidirectional LM head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEncoder {
    /// Token embeddings, `[vocab, hidden]`
    embedding: Array2<f32>,
    /// Composition of two child vectors, `2 * hidden -> hidden`
    compose: Linear,
    /// Span score vector
    score: Array1<f32>,
    /// LM context projection, `2 * hidden -> hidden`
    lm_context: Linear,
    /// LM output projection, tied to `embedding`
    #[serde(skip)]
    lm_head: Array2<f32>,
    decoder: TreeDecoder,
    window_size: usize,
    seed: u64,
    #[serde(skip, default = "detached_rng")]
    rng: StdRng,
}

impl ChartEncoder {
    /// Randomly initialised encoder
    pub fn new(config: &R2D2Config) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let dim = config.hidden_size;

        let embedding = Array2::from_shape_fn((config.vocab_size, dim), |_| rng.gen_range(-0.1..0.1));
        let compose = Linear::new(2 * dim, dim, &mut rng);
        let score = Array1::from_shape_fn(dim, |_| rng.gen_range(-0.1..0.1) / (dim as f32).sqrt());
        let lm_context = Linear::new(2 * dim, dim, &mut rng);
        let decoder = TreeDecoder::new(dim, &mut rng);

        let mut encoder = ChartEncoder {
            embedding,
            compose,
            score,
            lm_context,
            lm_head: Array2::zeros((0, 0)),
            decoder,
            window_size: config.window_size,
            seed: config.seed,
            rng,
        };
        encoder.tie_weights();
        Ok(encoder)
    }

    /// Vocabulary size
    pub fn vocab_size(&self) -> usize {
        self.embedding.nrows()
    }

    /// Save parameters as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path)
    }

    /// Replace parameters with a saved encoder and re-tie the LM head
    pub fn from_pretrain<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let loaded: ChartEncoder = load_json(path)?;
        *self = loaded;
        self.rng = StdRng::seed_from_u64(self.seed);
        self.tie_weights();
        log::info!("loaded chart encoder with vocabulary of {}", self.vocab_size());
        Ok(())
    }

    fn embedding_row(&self, token: usize) -> Result<Array1<f32>> {
        if token >= self.vocab_size() {
            return Err(R2D2Error::InvalidToken(token));
        }
        Ok(self.embedding.row(token).to_owned())
    }

    fn compose_pair(&self, left: ArrayView1<f32>, right: ArrayView1<f32>) -> Array1<f32> {
        self.compose.forward_vec(concat_pair(left, right).view()).mapv(f32::tanh)
    }

    /// Candidates for every split of `span` whose halves are already in the chart
    fn candidates_for(&self, chart: &RowChart, span: Span) -> Result<Vec<Candidate>> {
        let (start, end) = span;
        let mut candidates = Vec::new();
        for k in start..end {
            if let (Some(left), Some(right)) = (chart.cells.get(&(start, k)), chart.cells.get(&(k + 1, end))) {
                let (left, right) = (left.best(), right.best());
                let e_ij = self.compose_pair(left.e_ij.view(), right.e_ij.view());
                let log_p = left.log_p + right.log_p + self.score.dot(&e_ij);
                candidates.push(Candidate { split: Some(k), e_ij, log_p });
            }
        }
        if candidates.is_empty() {
            return Err(R2D2Error::ShapeMismatch(format!("no derivation for span {:?}", span)));
        }
        Ok(candidates)
    }

    fn build_row(&self, tokens: &[usize], trajectory: Option<&[usize]>) -> Result<RowChart> {
        let n = tokens.len();
        if n == 0 {
            return Err(R2D2Error::ShapeMismatch("cannot encode a row without tokens".to_string()));
        }
        if let Some(trajectory) = trajectory {
            validate_trajectory(trajectory, n)?;
        }

        let mut chart = RowChart::new(n);
        for (i, &token) in tokens.iter().enumerate() {
            chart.insert((i, i), Cell::leaf(self.embedding_row(token)?));
        }

        for width in 2..=self.window_size.min(n) {
            for start in 0..=(n - width) {
                let span = (start, start + width - 1);
                let cell = Cell::from_candidates(self.candidates_for(&chart, span)?);
                chart.insert(span, cell);
            }
        }

        if chart.contains(chart.root_span()) {
            return Ok(chart);
        }

        let mut segments: Vec<Span> = (0..n).map(|i| (i, i)).collect();
        match trajectory {
            Some(trajectory) => {
                for &p in trajectory {
                    let s = segments
                        .iter()
                        .position(|&(_, end)| end == p)
                        .filter(|&s| s + 1 < segments.len())
                        .ok_or_else(|| R2D2Error::InvalidTrajectory(format!("position {} already merged", p)))?;
                    let merged = (segments[s].0, segments[s + 1].1);
                    if !chart.contains(merged) {
                        let cell = Cell::from_candidates(self.candidates_for(&chart, merged)?);
                        chart.insert(merged, cell);
                    }
                    segments[s] = merged;
                    segments.remove(s + 1);
                }
            }
            None => {
                while segments.len() > 1 {
                    let mut best: Option<(usize, Option<Cell>, f32)> = None;
                    for s in 0..segments.len() - 1 {
                        let merged = (segments[s].0, segments[s + 1].1);
                        let (fresh, log_p) = match chart.cells.get(&merged) {
                            Some(cell) => (None, cell.best().log_p),
                            None => {
                                let cell = Cell::from_candidates(self.candidates_for(&chart, merged)?);
                                let log_p = cell.best().log_p;
                                (Some(cell), log_p)
                            }
                        };
                        if best.as_ref().map_or(true, |(_, _, top)| log_p > *top) {
                            best = Some((s, fresh, log_p));
                        }
                    }

                    let Some((s, fresh, _)) = best else { break };
                    let merged = (segments[s].0, segments[s + 1].1);
                    if let Some(cell) = fresh {
                        chart.insert(merged, cell);
                    }
                    segments[s] = merged;
                    segments.remove(s + 1);
                }
            }
        }

        Ok(chart)
    }

    /// Summed LM loss of one row; each token is predicted from the widest cells beside it
    fn row_lm_loss(&self, chart: &RowChart, tokens: &[usize]) -> f32 {
        let dim = self.hidden_size();
        let zeros = Array1::zeros(dim);
        let mut total = 0.0;
        for (t, &token) in tokens.iter().enumerate() {
            let left = t
                .checked_sub(1)
                .and_then(|end| chart.widest_ending_at(end))
                .map_or(zeros.view(), |c| c.best().e_ij.view());
            let right = chart
                .widest_starting_at(t + 1)
                .map_or(zeros.view(), |c| c.best().e_ij.view());

            let hidden = self.lm_context.forward_vec(concat_pair(left, right).view()).mapv(f32::tanh);
            let logits = self.lm_head.dot(&hidden);
            total -= log_softmax(logits.view())[token];
        }
        total
    }

    fn write_tables(
        &self,
        charts: &[RowChart],
        recover_tree: bool,
    ) -> Result<(Vec<ChartTable>, TensorCache)> {
        let capacity = charts.iter().map(RowChart::num_nodes).sum();
        let mut cache = TensorCache::with_capacity(self.hidden_size(), capacity);
        let mut tables = Vec::with_capacity(charts.len());

        for chart in charts {
            let root_span = chart.root_span();
            let mut root = None;
            for &span in &chart.order {
                let cell = &chart.cells[&span];
                let ids: Vec<CacheId> = cell
                    .candidates
                    .iter()
                    .map(|c| cache.insert(c.e_ij.clone(), c.log_p))
                    .collect::<Result<_>>()?;

                if span == root_span {
                    let best = cell.best();
                    root = Some(ChartCell {
                        start: span.0,
                        end: span.1,
                        best_node: ChartNode {
                            cache_id: ids[cell.best],
                            start: span.0,
                            end: span.1,
                            split: best.split,
                            log_p: best.log_p,
                        },
                        candidates: ids.len(),
                    });
                }
            }

            let root = root.ok_or_else(|| {
                R2D2Error::ShapeMismatch(format!("chart has no root cell {:?}", root_span))
            })?;
            let tree = if recover_tree { chart.best_tree() } else { Vec::new() };
            tables.push(ChartTable { root, tree });
        }

        Ok((tables, cache))
    }
}

impl TreeEncoder for ChartEncoder {
    fn hidden_size(&self) -> usize {
        self.embedding.ncols()
    }

    fn encode(&mut self, request: &EncodeRequest<'_>) -> Result<EncoderOutput> {
        let batch = request.batch;
        let rows: Vec<Vec<usize>> = (0..batch.batch_size()).map(|r| batch.tokens(r)).collect();
        if let Some(trajectories) = request.merge_trajectories {
            if trajectories.len() != rows.len() {
                return Err(R2D2Error::ShapeMismatch(format!(
                    "{} trajectories for {} rows",
                    trajectories.len(),
                    rows.len()
                )));
            }
        }
        if request.lm_loss && self.lm_head.dim() != self.embedding.dim() {
            return Err(R2D2Error::ShapeMismatch("LM head is not tied to the embedding".to_string()));
        }

        let this = &*self;
        let charts: Vec<RowChart> = rows
            .par_iter()
            .enumerate()
            .map(|(r, tokens)| {
                let trajectory = request.merge_trajectories.map(|t| t[r].as_slice());
                this.build_row(tokens, trajectory)
            })
            .collect::<Result<_>>()?;

        let loss = if request.lm_loss {
            let total: f32 = charts
                .par_iter()
                .zip(rows.par_iter())
                .map(|(chart, tokens)| this.row_lm_loss(chart, tokens))
                .sum();
            let count: usize = rows.iter().map(Vec::len).sum();
            total / count.max(1) as f32
        } else {
            0.0
        };

        let sampled_trees = if request.sample_trees > 0 {
            let mut derivations = Vec::with_capacity(charts.len() * request.sample_trees);
            for (r, chart) in charts.iter().enumerate() {
                for _ in 0..request.sample_trees {
                    derivations.push((r, chart.sample_derivation(&mut self.rng)));
                }
            }
            Some(SampledTrees::from_derivations(&derivations, batch.seq_len()))
        } else {
            None
        };

        let (tables, cache) = self.write_tables(&charts, request.recover_tree)?;
        log::debug!(
            "encoded {} rows into {} cache entries, lm loss {:.4}",
            tables.len(),
            cache.len(),
            loss
        );

        Ok(EncoderOutput {
            tables,
            tensor_cache: request.keep_tensor_cache.then_some(cache),
            loss,
            sampled_trees,
        })
    }

    fn compose_along(&self, batch: &TokenBatch, trajectories: &MergeTrajectories) -> Result<Array2<f32>> {
        if trajectories.len() != batch.batch_size() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "{} trajectories for {} rows",
                trajectories.len(),
                batch.batch_size()
            )));
        }

        let roots: Vec<Array1<f32>> = (0..batch.batch_size())
            .into_par_iter()
            .map(|r| -> Result<Array1<f32>> {
                let tokens = batch.tokens(r);
                if tokens.is_empty() {
                    return Err(R2D2Error::ShapeMismatch("cannot encode a row without tokens".to_string()));
                }
                validate_trajectory(&trajectories[r], tokens.len())?;

                let mut segments: Vec<(Span, Array1<f32>)> = tokens
                    .iter()
                    .enumerate()
                    .map(|(i, &token)| -> Result<(Span, Array1<f32>)> {
                        Ok(((i, i), self.embedding_row(token)?))
                    })
                    .collect::<Result<_>>()?;
                for &p in &trajectories[r] {
                    let s = segments
                        .iter()
                        .position(|((_, end), _)| *end == p)
                        .filter(|&s| s + 1 < segments.len())
                        .ok_or_else(|| R2D2Error::InvalidTrajectory(format!("position {} already merged", p)))?;
                    let ((start, _), left) = &segments[s];
                    let ((_, end), right) = &segments[s + 1];
                    let merged = ((*start, *end), self.compose_pair(left.view(), right.view()));
                    segments[s] = merged;
                    segments.remove(s + 1);
                }
                Ok(segments.swap_remove(0).1)
            })
            .collect::<Result<_>>()?;

        let mut pooled = Array2::zeros((roots.len(), self.hidden_size()));
        for (r, root) in roots.iter().enumerate() {
            pooled.row_mut(r).assign(root);
        }
        Ok(pooled)
    }

    fn embed(&self, ids: &[usize]) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((ids.len(), self.hidden_size()));
        for (r, &id) in ids.iter().enumerate() {
            out.row_mut(r).assign(&self.embedding_row(id)?);
        }
        Ok(out)
    }

    fn tree_decode(&self, inputs: &Array3<f32>) -> Result<Array3<f32>> {
        self.decoder.forward(inputs)
    }

    fn tie_weights(&mut self) {
        self.lm_head = self.embedding.clone();
    }
}
