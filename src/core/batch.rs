//! Token batches fed to the parser and encoder

use ndarray::{Array2, Array3, ArrayView1};
use crate::{R2D2Error, Result};

/// Inclusive `(start, end)` token spans that must stay indivisible, for one row
pub type AtomSpans = Vec<(usize, usize)>;

/// A padded batch of token sequences
///
/// Valid tokens of a row form a prefix; the row length is the mask sum.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBatch {
    /// Token ids, shape `[batch, seq_len]`
    pub input_ids: Array2<usize>,
    /// 1 for real tokens, 0 for padding, same shape as `input_ids`
    pub attention_mask: Array2<u8>,
}

impl TokenBatch {
    /// Create a batch, checking that ids and mask agree in shape
    pub fn new(input_ids: Array2<usize>, attention_mask: Array2<u8>) -> Result<Self> {
        if input_ids.dim() != attention_mask.dim() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "input_ids {:?} vs attention_mask {:?}",
                input_ids.dim(),
                attention_mask.dim()
            )));
        }
        Ok(TokenBatch { input_ids, attention_mask })
    }

    /// Build a batch from unpadded rows, padding with id 0
    pub fn from_rows(rows: &[Vec<usize>]) -> Self {
        let seq_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut input_ids = Array2::zeros((rows.len(), seq_len));
        let mut attention_mask = Array2::zeros((rows.len(), seq_len));
        for (r, row) in rows.iter().enumerate() {
            for (t, &id) in row.iter().enumerate() {
                input_ids[(r, t)] = id;
                attention_mask[(r, t)] = 1;
            }
        }
        TokenBatch { input_ids, attention_mask }
    }

    /// Number of rows
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Padded sequence length
    pub fn seq_len(&self) -> usize {
        self.input_ids.ncols()
    }

    /// Number of valid tokens in each row
    pub fn lengths(&self) -> Vec<usize> {
        self.attention_mask
            .rows()
            .into_iter()
            .map(|row| row.iter().filter(|&&m| m != 0).count())
            .collect()
    }

    /// Valid token ids of one row
    pub fn tokens(&self, row: usize) -> Vec<usize> {
        let ids: ArrayView1<usize> = self.input_ids.row(row);
        ids.iter()
            .zip(self.attention_mask.row(row).iter())
            .filter(|(_, &m)| m != 0)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Check that atom spans, when given, cover exactly one entry per row
    pub fn check_atom_spans(&self, atom_spans: Option<&[AtomSpans]>) -> Result<()> {
        match atom_spans {
            Some(spans) if spans.len() != self.batch_size() => Err(R2D2Error::ShapeMismatch(format!(
                "{} atom span lists for {} rows",
                spans.len(),
                self.batch_size()
            ))),
            _ => Ok(()),
        }
    }
}

/// A batch of sentence pairs, shape `[batch, 2, seq_len]`
#[derive(Debug, Clone, PartialEq)]
pub struct PairBatch {
    /// Token ids
    pub input_ids: Array3<usize>,
    /// Attention mask
    pub attention_mask: Array3<u8>,
}

impl PairBatch {
    /// Create a pair batch, checking shapes
    pub fn new(input_ids: Array3<usize>, attention_mask: Array3<u8>) -> Result<Self> {
        if input_ids.dim() != attention_mask.dim() {
            return Err(R2D2Error::ShapeMismatch(format!(
                "input_ids {:?} vs attention_mask {:?}",
                input_ids.dim(),
                attention_mask.dim()
            )));
        }
        if input_ids.dim().1 != 2 {
            return Err(R2D2Error::ShapeMismatch(format!(
                "pair axis has {} entries, expected 2",
                input_ids.dim().1
            )));
        }
        Ok(PairBatch { input_ids, attention_mask })
    }

    /// Build a pair batch from unpadded `(first, second)` rows
    pub fn from_pairs(pairs: &[(Vec<usize>, Vec<usize>)]) -> Self {
        let rows: Vec<Vec<usize>> = pairs
            .iter()
            .flat_map(|(a, b)| [a.clone(), b.clone()])
            .collect();
        let flat = TokenBatch::from_rows(&rows);
        let shape = (pairs.len(), 2, flat.seq_len());
        let input_ids = Array3::from_shape_fn(shape, |(b, p, t)| flat.input_ids[(2 * b + p, t)]);
        let attention_mask = Array3::from_shape_fn(shape, |(b, p, t)| flat.attention_mask[(2 * b + p, t)]);
        PairBatch { input_ids, attention_mask }
    }

    /// Number of pairs
    pub fn batch_size(&self) -> usize {
        self.input_ids.dim().0
    }

    /// Flatten to `[2 * batch, seq_len]`; rows `2b` and `2b + 1` hold pair `b`
    pub fn flatten(&self) -> TokenBatch {
        let (batch, pair, seq_len) = self.input_ids.dim();
        let shape = (batch * pair, seq_len);
        let input_ids = Array2::from_shape_fn(shape, |(r, t)| self.input_ids[(r / pair, r % pair, t)]);
        let attention_mask = Array2::from_shape_fn(shape, |(r, t)| self.attention_mask[(r / pair, r % pair, t)]);
        TokenBatch { input_ids, attention_mask }
    }
}
