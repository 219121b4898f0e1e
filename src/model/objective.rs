//! Dual-path training objective and inference branching
//!
//! Both classifier variants share the same backbone: a split parser that
//! guides a tree encoder, and a force-encoding path that composes strictly
//! along the parser's tree. The variants differ only in how pooled vectors
//! become logits, which they pass in as a closure.

use ndarray::Array2;
use crate::core::{AtomSpans, TokenBatch};
use crate::encoder::{EncodeRequest, TreeEncoder};
use crate::nn::{cross_entropy, softmax_rows};
use crate::parser::{MergeTrajectories, SplitParser};
use crate::{R2D2Error, Result};
use super::force::force_encode;
use super::pooling::pool_root_vectors;

/// Individual terms of the training loss
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    /// Cross-entropy on the parser-guided path
    pub classification: f32,
    /// Bidirectional language-model loss reported by the encoder
    pub lm: f32,
    /// Parser loss against the encoder's sampled trees
    pub kl: f32,
    /// Cross-entropy on the force-encoded path
    pub force_encoding: f32,
}

impl LossBreakdown {
    /// Unweighted sum of all terms
    pub fn total(&self) -> f32 {
        self.classification + self.lm + self.kl + self.force_encoding
    }
}

/// Result of a forward pass
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Training mode, labels were given
    Loss(LossBreakdown),
    /// Inference mode, `[batch, label_num]` class probabilities
    Probabilities(Array2<f32>),
}

impl ModelOutput {
    /// Loss terms, if this is a training output
    pub fn loss(&self) -> Option<&LossBreakdown> {
        match self {
            ModelOutput::Loss(loss) => Some(loss),
            ModelOutput::Probabilities(_) => None,
        }
    }

    /// Class probabilities, if this is an inference output
    pub fn probabilities(&self) -> Option<&Array2<f32>> {
        match self {
            ModelOutput::Probabilities(probs) => Some(probs),
            ModelOutput::Loss(_) => None,
        }
    }
}

/// Per-call options of a forward pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardOptions<'a> {
    /// Trees the encoder samples per example in training
    pub num_samples: usize,
    /// Spans kept indivisible by the parser, one list per encoded row
    pub atom_spans: Option<&'a [AtomSpans]>,
    /// At inference, pool along the parser's tree instead of the chart
    pub force_encoding: bool,
}

impl<'a> ForwardOptions<'a> {
    /// No sampling, no atom spans, chart pooling
    pub fn new() -> Self {
        ForwardOptions::default()
    }

    /// Set the number of sampled trees per example
    pub fn num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    /// Set atom spans
    pub fn atom_spans(mut self, atom_spans: Option<&'a [AtomSpans]>) -> Self {
        self.atom_spans = atom_spans;
        self
    }

    /// Set force encoding
    pub fn force_encoding(mut self, force_encoding: bool) -> Self {
        self.force_encoding = force_encoding;
        self
    }
}

/// Pooled vectors and auxiliary losses of the parser-guided training path
#[derive(Debug, Clone)]
pub struct GuidedPass {
    /// Root vector of each row
    pub pooled: Array2<f32>,
    /// Encoder LM loss
    pub lm_loss: f32,
    /// Parser loss, 0 when the parser is disabled or nothing was sampled
    pub kl_loss: f32,
}

/// Encoder and parser pair shared by the classifier variants
#[derive(Debug, Clone)]
pub struct Backbone<E, P> {
    pub(crate) encoder: E,
    pub(crate) parser: P,
    disable_parser: bool,
}

impl<E: TreeEncoder, P: SplitParser> Backbone<E, P> {
    /// Create a backbone; a disabled parser still serves the force-encoding path
    pub fn new(encoder: E, parser: P, disable_parser: bool) -> Self {
        Backbone { encoder, parser, disable_parser }
    }

    /// Tree encoder
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Split parser
    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Check if parser guidance is switched off
    pub fn parser_disabled(&self) -> bool {
        self.disable_parser
    }

    fn guidance(&self, batch: &TokenBatch, atom_spans: Option<&[AtomSpans]>) -> Result<Option<MergeTrajectories>> {
        if self.disable_parser {
            return Ok(None);
        }
        self.parser.parse(batch, atom_spans).map(Some)
    }

    /// Guided encoder call with sampling and LM loss, pooled at the chart roots
    pub fn guided_pass(&mut self, batch: &TokenBatch, options: &ForwardOptions<'_>) -> Result<GuidedPass> {
        let trajectories = self.guidance(batch, options.atom_spans)?;
        let request = EncodeRequest::new(batch)
            .merge_trajectories(trajectories.as_ref())
            .sample_trees(options.num_samples)
            .recover_tree(true)
            .keep_tensor_cache(true)
            .lm_loss(true);
        let output = self.encoder.encode(&request)?;

        let cache = output
            .tensor_cache
            .as_ref()
            .ok_or_else(|| R2D2Error::ShapeMismatch("encoder returned no tensor cache".to_string()))?;
        let pooled = pool_root_vectors(&output.tables, cache)?;

        let kl_loss = if self.disable_parser {
            0.0
        } else {
            match &output.sampled_trees {
                Some(sampled) => self.parser.split_loss(batch, sampled)?,
                None => {
                    log::warn!("no sampled trees, skipping parser loss");
                    0.0
                }
            }
        };

        Ok(GuidedPass { pooled, lm_loss: output.loss, kl_loss })
    }

    /// Pooled vectors along the parser's tree
    pub fn forced_pass(&self, batch: &TokenBatch, atom_spans: Option<&[AtomSpans]>) -> Result<Array2<f32>> {
        force_encode(&self.parser, &self.encoder, batch, atom_spans)
    }

    /// Pooled vectors for inference, by the chart or along the parser's tree
    pub fn inference_pass(&mut self, batch: &TokenBatch, options: &ForwardOptions<'_>) -> Result<Array2<f32>> {
        if options.force_encoding {
            if self.disable_parser {
                return Err(R2D2Error::ForceEncodingWithoutParser);
            }
            log::debug!("inference by force encoding");
            return self.forced_pass(batch, options.atom_spans);
        }

        let trajectories = self.guidance(batch, options.atom_spans)?;
        let request = EncodeRequest::new(batch)
            .merge_trajectories(trajectories.as_ref())
            .recover_tree(true)
            .keep_tensor_cache(true)
            .lm_loss(false);
        let output = self.encoder.encode(&request)?;
        let cache = output
            .tensor_cache
            .as_ref()
            .ok_or_else(|| R2D2Error::ShapeMismatch("encoder returned no tensor cache".to_string()))?;
        pool_root_vectors(&output.tables, cache)
    }

    /// Sum of classification, LM, parser and force-encoding losses
    ///
    /// `classify` maps pooled vectors to logits and is called once per path.
    pub(crate) fn dual_path_loss<F>(
        &mut self,
        batch: &TokenBatch,
        options: &ForwardOptions<'_>,
        labels: &[usize],
        mut classify: F,
    ) -> Result<LossBreakdown>
    where
        F: FnMut(&E, &Array2<f32>) -> Result<Array2<f32>>,
    {
        let guided = self.guided_pass(batch, options)?;
        let logits = classify(&self.encoder, &guided.pooled)?;
        let classification = cross_entropy(&logits, labels)?;

        let forced = self.forced_pass(batch, options.atom_spans)?;
        let forced_logits = classify(&self.encoder, &forced)?;
        let force_encoding = cross_entropy(&forced_logits, labels)?;

        let breakdown = LossBreakdown {
            classification,
            lm: guided.lm_loss,
            kl: guided.kl_loss,
            force_encoding,
        };
        log::debug!(
            "loss {:.4} (cls {:.4}, lm {:.4}, kl {:.4}, force {:.4})",
            breakdown.total(),
            breakdown.classification,
            breakdown.lm,
            breakdown.kl,
            breakdown.force_encoding
        );
        Ok(breakdown)
    }

    /// Softmax over the logits of the inference pooling
    pub(crate) fn probabilities<F>(
        &mut self,
        batch: &TokenBatch,
        options: &ForwardOptions<'_>,
        classify: F,
    ) -> Result<Array2<f32>>
    where
        F: FnOnce(&E, &Array2<f32>) -> Result<Array2<f32>>,
    {
        let pooled = self.inference_pass(batch, options)?;
        let logits = classify(&self.encoder, &pooled)?;
        Ok(softmax_rows(&logits))
    }
}
