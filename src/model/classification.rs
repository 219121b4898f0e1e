//! Single-sentence classifier

use std::path::Path;
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{de::DeserializeOwned, Serialize};
use crate::core::{R2D2Config, TokenBatch};
use crate::encoder::{ChartEncoder, TreeEncoder};
use crate::nn::ClassifierHead;
use crate::parser::{SplitParser, TopdownParser};
use crate::{R2D2Error, Result};
use super::checkpoint::{load_checkpoint, save_checkpoint};
use super::objective::{Backbone, ForwardOptions, LossBreakdown, ModelOutput};

/// Classifies each row of a [`TokenBatch`] from its root span vector
pub struct SentenceClassifier<E = ChartEncoder, P = TopdownParser> {
    backbone: Backbone<E, P>,
    classifier: ClassifierHead,
    rng: StdRng,
}

impl<E: TreeEncoder, P: SplitParser> SentenceClassifier<E, P> {
    /// Classifier over the given collaborators
    pub fn new(config: &R2D2Config, label_num: usize, encoder: E, parser: P, disable_parser: bool) -> Result<Self> {
        config.validate()?;
        if label_num == 0 {
            return Err(R2D2Error::InvalidConfig("label_num must be positive".to_string()));
        }
        if encoder.hidden_size() != config.hidden_size {
            return Err(R2D2Error::ShapeMismatch(format!(
                "encoder width {} vs hidden_size {}",
                encoder.hidden_size(),
                config.hidden_size
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(2));
        let classifier = ClassifierHead::new(config, label_num, &mut rng);
        Ok(SentenceClassifier {
            backbone: Backbone::new(encoder, parser, disable_parser),
            classifier,
            rng,
        })
    }

    /// Training loss when `labels` are given, class probabilities otherwise
    pub fn forward(
        &mut self,
        batch: &TokenBatch,
        options: &ForwardOptions<'_>,
        labels: Option<&[usize]>,
    ) -> Result<ModelOutput> {
        match labels {
            Some(labels) => self.loss(batch, options, labels).map(ModelOutput::Loss),
            None => self.predict(batch, options).map(ModelOutput::Probabilities),
        }
    }

    /// Dual-path training loss, one label per row
    pub fn loss(&mut self, batch: &TokenBatch, options: &ForwardOptions<'_>, labels: &[usize]) -> Result<LossBreakdown> {
        log::debug!("training on {} rows, {} samples per row", batch.batch_size(), options.num_samples);
        let classifier = &self.classifier;
        let rng = &mut self.rng;
        self.backbone
            .dual_path_loss(batch, options, labels, |_, pooled| classifier.forward_train(pooled, rng))
    }

    /// Class probabilities, `[batch, label_num]`
    pub fn predict(&mut self, batch: &TokenBatch, options: &ForwardOptions<'_>) -> Result<Array2<f32>> {
        let classifier = &self.classifier;
        self.backbone
            .probabilities(batch, options, |_, pooled| classifier.forward(pooled))
    }

    /// Tree encoder
    pub fn encoder(&self) -> &E {
        self.backbone.encoder()
    }

    /// Split parser
    pub fn parser(&self) -> &P {
        self.backbone.parser()
    }

    /// Classification head
    pub fn classifier(&self) -> &ClassifierHead {
        &self.classifier
    }

    /// Check if parser guidance is switched off
    pub fn parser_disabled(&self) -> bool {
        self.backbone.parser_disabled()
    }
}

impl<E, P> SentenceClassifier<E, P>
where
    E: TreeEncoder + Serialize + DeserializeOwned,
    P: SplitParser + Serialize + DeserializeOwned,
{
    /// Save encoder, parser and head to one JSON file
    pub fn save<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        save_checkpoint(&self.backbone, &self.classifier, path)
    }

    /// Restore a checkpoint written by [`SentenceClassifier::save`]
    pub fn load_model<Q: AsRef<Path>>(&mut self, path: Q) -> Result<()> {
        load_checkpoint(&mut self.backbone, &mut self.classifier, path)
    }
}

impl SentenceClassifier<ChartEncoder, TopdownParser> {
    /// Randomly initialised chart encoder and top-down parser
    pub fn from_config(config: &R2D2Config, label_num: usize, disable_parser: bool) -> Result<Self> {
        let encoder = ChartEncoder::new(config)?;
        let parser = TopdownParser::new(config)?;
        Self::new(config, label_num, encoder, parser, disable_parser)
    }

    /// Load pretrained encoder and parser, keeping the classification head
    pub fn from_pretrain<Q: AsRef<Path>, R: AsRef<Path>>(&mut self, encoder_path: Q, parser_path: R) -> Result<()> {
        self.backbone.encoder.from_pretrain(encoder_path)?;
        self.backbone.parser = TopdownParser::load(parser_path)?;
        Ok(())
    }
}
