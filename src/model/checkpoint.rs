//! Whole-model checkpoints

use std::path::Path;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use crate::encoder::TreeEncoder;
use crate::nn::ClassifierHead;
use crate::utils::{load_json, save_json};
use crate::Result;
use super::objective::Backbone;

#[derive(Serialize)]
struct CheckpointRef<'a, E, P> {
    encoder: &'a E,
    parser: &'a P,
    classifier: &'a ClassifierHead,
}

#[derive(Deserialize)]
struct Checkpoint<E, P> {
    encoder: E,
    parser: P,
    classifier: ClassifierHead,
}

pub(crate) fn save_checkpoint<E, P, Q>(backbone: &Backbone<E, P>, classifier: &ClassifierHead, path: Q) -> Result<()>
where
    E: Serialize,
    P: Serialize,
    Q: AsRef<Path>,
{
    let state = CheckpointRef {
        encoder: &backbone.encoder,
        parser: &backbone.parser,
        classifier,
    };
    save_json(&state, path)
}

/// Restore encoder, parser and head, then re-tie the encoder's shared weights
pub(crate) fn load_checkpoint<E, P, Q>(backbone: &mut Backbone<E, P>, classifier: &mut ClassifierHead, path: Q) -> Result<()>
where
    E: TreeEncoder + DeserializeOwned,
    P: DeserializeOwned,
    Q: AsRef<Path>,
{
    let state: Checkpoint<E, P> = load_json(path)?;
    backbone.encoder = state.encoder;
    backbone.encoder.tie_weights();
    backbone.parser = state.parser;
    *classifier = state.classifier;
    log::info!("restored checkpoint with {} labels", classifier.label_num());
    Ok(())
}
