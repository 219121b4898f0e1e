//! Sentence-pair classifier
//!
//! Both sentences of a pair are encoded as separate rows of one flattened
//! batch. Their root vectors are fused by a [`PairwiseCombiner`] before the
//! classification head, so labels and outputs are per pair.

use std::path::Path;
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{de::DeserializeOwned, Serialize};
use crate::core::{PairBatch, R2D2Config};
use crate::encoder::{ChartEncoder, TreeEncoder};
use crate::nn::ClassifierHead;
use crate::parser::{SplitParser, TopdownParser};
use crate::{R2D2Error, Result};
use super::checkpoint::{load_checkpoint, save_checkpoint};
use super::objective::{Backbone, ForwardOptions, LossBreakdown, ModelOutput};
use super::pairwise::PairwiseCombiner;

/// Classifies sentence pairs of a [`PairBatch`]
///
/// Atom spans in [`ForwardOptions`] refer to the flattened rows, `2b` and
/// `2b + 1` for pair `b`.
pub struct CrossSentenceClassifier<E = ChartEncoder, P = TopdownParser> {
    backbone: Backbone<E, P>,
    classifier: ClassifierHead,
    pairwise: PairwiseCombiner,
    rng: StdRng,
}

impl<E: TreeEncoder, P: SplitParser> CrossSentenceClassifier<E, P> {
    /// Classifier over the given collaborators, marking pairs with `config.pairwise_task_id`
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
        Ok(CrossSentenceClassifier {
            backbone: Backbone::new(encoder, parser, disable_parser),
            classifier,
            pairwise: PairwiseCombiner::new(config.pairwise_task_id),
            rng,
        })
    }

    /// Training loss when `labels` are given, class probabilities otherwise
    pub fn forward(
        &mut self,
        batch: &PairBatch,
        options: &ForwardOptions<'_>,
        labels: Option<&[usize]>,
    ) -> Result<ModelOutput> {
        match labels {
            Some(labels) => self.loss(batch, options, labels).map(ModelOutput::Loss),
            None => self.predict(batch, options).map(ModelOutput::Probabilities),
        }
    }

    /// Dual-path training loss, one label per pair
    pub fn loss(&mut self, batch: &PairBatch, options: &ForwardOptions<'_>, labels: &[usize]) -> Result<LossBreakdown> {
        if labels.len() != batch.batch_size() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "{} labels for {} pairs",
                labels.len(),
                batch.batch_size()
            )));
        }
        log::debug!("training on {} pairs, {} samples per row", batch.batch_size(), options.num_samples);

        let flat = batch.flatten();
        let pairwise = &self.pairwise;
        let classifier = &self.classifier;
        let rng = &mut self.rng;
        self.backbone.dual_path_loss(&flat, options, labels, |encoder, pooled| {
            let fused = pairwise.combine(encoder, pooled)?;
            classifier.forward_train(&fused, rng)
        })
    }

    /// Class probabilities, `[pairs, label_num]`
    pub fn predict(&mut self, batch: &PairBatch, options: &ForwardOptions<'_>) -> Result<Array2<f32>> {
        let flat = batch.flatten();
        let pairwise = &self.pairwise;
        let classifier = &self.classifier;
        self.backbone.probabilities(&flat, options, |encoder, pooled| {
            let fused = pairwise.combine(encoder, pooled)?;
            classifier.forward(&fused)
        })
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

    /// Pair fusion
    pub fn pairwise(&self) -> &PairwiseCombiner {
        &self.pairwise
    }
}

impl<E, P> CrossSentenceClassifier<E, P>
where
    E: TreeEncoder + Serialize + DeserializeOwned,
    P: SplitParser + Serialize + DeserializeOwned,
{
    /// Save encoder, parser and head to one JSON file
    pub fn save<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        save_checkpoint(&self.backbone, &self.classifier, path)
    }

    /// Restore a checkpoint written by [`CrossSentenceClassifier::save`]
    pub fn load_model<Q: AsRef<Path>>(&mut self, path: Q) -> Result<()> {
        load_checkpoint(&mut self.backbone, &mut self.classifier, path)
    }
}

impl CrossSentenceClassifier<ChartEncoder, TopdownParser> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{StubEncoder, StubParser};
    use ndarray::s;

    fn stub_model(disable_parser: bool) -> CrossSentenceClassifier<StubEncoder, StubParser> {
        let config = R2D2Config::tiny(32);
        let encoder = StubEncoder::new(config.hidden_size, 0.25);
        CrossSentenceClassifier::new(&config, 2, encoder, StubParser::new(0.5), disable_parser).unwrap()
    }

    fn pairs() -> PairBatch {
        PairBatch::from_pairs(&[
            (vec![3, 1, 1], vec![4]),
            (vec![5], vec![6, 2]),
            (vec![7, 7], vec![8, 8, 8]),
        ])
    }

    #[test]
    fn test_pairs_stay_together_through_encoding() {
        let mut model = stub_model(false);
        model.predict(&pairs(), &ForwardOptions::new()).unwrap();

        let decoded = model.encoder().decoded.borrow();
        assert_eq!(decoded.len(), 1);
        let inputs = &decoded[0];
        assert_eq!(inputs.dim(), (3, 3, model.encoder().hidden_size()));
        for b in 0..3 {
            let expected = [-31.0, (3 + 2 * b) as f32, (4 + 2 * b) as f32];
            assert_eq!(inputs.slice(s![b, .., 0]).to_vec(), expected.to_vec());
        }
    }

    #[test]
    fn test_loss_per_pair_with_both_paths() {
        let mut model = stub_model(false);
        let loss = model
            .loss(&pairs(), &ForwardOptions::new().num_samples(1), &[0, 1, 1])
            .unwrap();

        assert_eq!(loss.lm, 0.25);
        assert_eq!(loss.kl, 0.5);
        assert_eq!(loss.total(), loss.classification + loss.lm + loss.kl + loss.force_encoding);
        // guided and forced paths each fuse once
        assert_eq!(model.encoder().decoded.borrow().len(), 2);
    }

    #[test]
    fn test_labels_are_per_pair() {
        let mut model = stub_model(false);
        let result = model.loss(&pairs(), &ForwardOptions::new(), &[0, 1, 1, 0, 0, 1]);
        assert!(matches!(result, Err(R2D2Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_force_encoding_rejected_without_parser() {
        let mut model = stub_model(true);
        let options = ForwardOptions::new().force_encoding(true);
        assert!(matches!(
            model.forward(&pairs(), &options, None),
            Err(R2D2Error::ForceEncodingWithoutParser)
        ));
    }

    #[test]
    fn test_disabled_parser_training() {
        let mut model = stub_model(true);
        let loss = model.loss(&pairs(), &ForwardOptions::new().num_samples(2), &[1, 0, 1]).unwrap();
        assert_eq!(loss.kl, 0.0);
        assert_eq!(model.encoder().guided_calls, vec![false]);
    }

    #[test]
    fn test_chart_model_end_to_end() {
        let config = R2D2Config::tiny(24);
        let mut model = CrossSentenceClassifier::from_config(&config, 3, false).unwrap();
        let batch = PairBatch::from_pairs(&[
            (vec![1, 2, 3], vec![4, 5]),
            (vec![6], vec![7, 8, 9, 10]),
        ]);

        let loss = model.loss(&batch, &ForwardOptions::new().num_samples(2), &[2, 0]).unwrap();
        assert!(loss.total().is_finite());

        for force in [false, true] {
            let probs = model.predict(&batch, &ForwardOptions::new().force_encoding(force)).unwrap();
            assert_eq!(probs.dim(), (2, 3));
            for row in probs.rows() {
                assert!((row.sum() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let config = R2D2Config::tiny(24);
        let mut model = CrossSentenceClassifier::from_config(&config, 2, false).unwrap();
        let path = std::env::temp_dir().join("fast_r2d2_pair_checkpoint.json");
        model.save(&path).unwrap();

        let mut restored = CrossSentenceClassifier::from_config(&R2D2Config { seed: 5, ..config }, 2, false).unwrap();
        restored.load_model(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let batch = PairBatch::from_pairs(&[(vec![1, 2], vec![3, 4])]);
        let options = ForwardOptions::new().force_encoding(true);
        assert_eq!(
            restored.predict(&batch, &options).unwrap(),
            model.predict(&batch, &options).unwrap()
        );
    }
}
