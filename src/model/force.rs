//! Deterministic pooling along the parser's tree

use ndarray::Array2;
use crate::core::{AtomSpans, TokenBatch};
use crate::encoder::TreeEncoder;
use crate::parser::SplitParser;
use crate::Result;

/// Pool one vector per row by composing strictly along the parser's best tree
///
/// Bypasses the chart and any sampled trees, so repeated calls give the same vectors.
pub fn force_encode<P, E>(
    parser: &P,
    encoder: &E,
    batch: &TokenBatch,
    atom_spans: Option<&[AtomSpans]>,
) -> Result<Array2<f32>>
where
    P: SplitParser + ?Sized,
    E: TreeEncoder + ?Sized,
{
    let trajectories = parser.parse(batch, atom_spans)?;
    let pooled = encoder.compose_along(batch, &trajectories)?;
    log::debug!("force encoded {} rows", pooled.nrows());
    Ok(pooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::R2D2Config;
    use crate::encoder::ChartEncoder;
    use crate::parser::TopdownParser;

    #[test]
    fn test_force_encode_is_deterministic() {
        let config = R2D2Config::tiny(16);
        let encoder = ChartEncoder::new(&config).unwrap();
        let parser = TopdownParser::new(&config).unwrap();
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3, 4, 5], vec![6, 7]]);

        let first = force_encode(&parser, &encoder, &batch, None).unwrap();
        let second = force_encode(&parser, &encoder, &batch, None).unwrap();
        assert_eq!(first.dim(), (2, config.hidden_size));
        assert_eq!(first, second);
    }

    #[test]
    fn test_force_encode_respects_atom_spans() {
        let config = R2D2Config::tiny(16);
        let encoder = ChartEncoder::new(&config).unwrap();
        let parser = TopdownParser::new(&config).unwrap();
        let batch = TokenBatch::from_rows(&[vec![1, 2, 3, 4]]);

        let spans = vec![vec![(0, 3)]];
        let pooled = force_encode(&parser, &encoder, &batch, Some(spans.as_slice())).unwrap();
        assert_eq!(pooled.nrows(), 1);
    }
}
