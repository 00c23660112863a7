pub mod lexicon;
pub mod prefix;

use crate::error::DecodeError;
use crate::types::{DecoderState, WordSpan};

/// Native output form of a search backend candidate.
///
/// The prefix search produces text; the lexicon search produces token ids.
/// The assembler derives the missing half so every hypothesis carries both.
#[derive(Debug, Clone)]
pub enum CandidateOutput {
    Text(String),
    TokenIds(Vec<usize>),
}

/// One raw beam candidate before hypothesis packing.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub output: CandidateOutput,
    pub score: f32,
    pub word_spans: Vec<WordSpan>,
    pub decoder_state: Option<DecoderState>,
}

/// Sample-level beam search over a batch of log-probability matrices.
///
/// `log_probs[i]` is the `[T, V+1]` matrix for sample `i`; only the first
/// `lengths[i]` rows are valid. Implementations return one non-empty,
/// score-descending candidate list per sample, index-aligned with the input.
pub trait SearchBackend: Send {
    fn search(
        &mut self,
        log_probs: &[Vec<Vec<f32>>],
        lengths: &[usize],
    ) -> Result<Vec<Vec<RawCandidate>>, DecodeError>;
}

pub(crate) fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Map a log-prob column index to its vocabulary index, skipping the blank
/// column. Returns `None` for the blank itself.
pub(crate) fn column_to_vocab_index(column: usize, blank_id: usize) -> Option<usize> {
    use std::cmp::Ordering;
    match column.cmp(&blank_id) {
        Ordering::Less => Some(column),
        Ordering::Equal => None,
        Ordering::Greater => Some(column - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sum_exp_basics() {
        let v = log_sum_exp(0.0_f32.ln(), 0.0_f32.ln());
        assert_eq!(v, f32::NEG_INFINITY);
        let v = log_sum_exp(0.5_f32.ln(), 0.5_f32.ln());
        assert!((v - 1.0_f32.ln()).abs() < 1e-6);
        assert_eq!(log_sum_exp(f32::NEG_INFINITY, -1.0), -1.0);
    }

    #[test]
    fn column_mapping_skips_blank() {
        // blank last (typical)
        assert_eq!(column_to_vocab_index(0, 2), Some(0));
        assert_eq!(column_to_vocab_index(1, 2), Some(1));
        assert_eq!(column_to_vocab_index(2, 2), None);
        // blank first
        assert_eq!(column_to_vocab_index(0, 0), None);
        assert_eq!(column_to_vocab_index(1, 0), Some(0));
        assert_eq!(column_to_vocab_index(2, 0), Some(1));
    }
}
