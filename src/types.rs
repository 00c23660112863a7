use candle_core::{Device, Tensor};

use crate::error::DecodeError;

/// A word together with the frame interval that produced it.
///
/// Frame interval is [start_frame, end_frame], both inclusive, indexed into
/// the valid time steps of the sample the word was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct WordSpan {
    pub word: String,
    pub start_frame: usize,
    pub end_frame: usize,
}

/// Opaque per-hypothesis decoder state.
///
/// Search backends may attach scalars, tensors, or arbitrarily nested lists
/// of either; the assembler migrates every tensor leaf to host memory before
/// the hypothesis is returned to the caller.
#[derive(Debug, Clone)]
pub enum DecoderState {
    Scalar(f32),
    Tensor(Tensor),
    List(Vec<DecoderState>),
}

impl DecoderState {
    pub fn to_device(&self, device: &Device) -> Result<Self, DecodeError> {
        match self {
            Self::Scalar(v) => Ok(Self::Scalar(*v)),
            Self::Tensor(t) => t
                .to_device(device)
                .map(Self::Tensor)
                .map_err(|e| DecodeError::runtime("decoder state transfer", e)),
            Self::List(states) => states
                .iter()
                .map(|s| s.to_device(device))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
        }
    }
}

/// One candidate output sequence for a single sample.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Combined acoustic + language-model score, higher is better.
    pub score: f32,
    /// Token indices into the decoding vocabulary. Decoding these through the
    /// active tokenizer or vocabulary reproduces `text`.
    pub token_ids: Vec<usize>,
    pub text: String,
    /// Word-level frame spans, empty when the backend does not produce them.
    pub word_spans: Vec<WordSpan>,
    /// Log-probability snapshot `[len, V+1]` for the sample's valid frames.
    /// Only populated when alignment preservation is enabled.
    pub alignment: Option<Tensor>,
    pub decoder_state: Option<DecoderState>,
    /// True number of valid frames for the sample this hypothesis belongs to.
    pub length: u32,
}

impl Hypothesis {
    pub(crate) fn empty() -> Self {
        Self {
            score: 0.0,
            token_ids: Vec::new(),
            text: String::new(),
            word_spans: Vec::new(),
            alignment: None,
            decoder_state: None,
            length: 0,
        }
    }
}

/// Ranked candidates for one sample, best-first by score.
#[derive(Debug, Clone)]
pub struct NBestHypotheses(pub Vec<Hypothesis>);

impl NBestHypotheses {
    pub fn best(&self) -> &Hypothesis {
        // Construction guarantees at least one hypothesis per sample.
        &self.0[0]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Batch decode result, index-aligned with the input batch.
#[derive(Debug, Clone)]
pub enum BatchHypotheses {
    /// One best hypothesis per sample (`return_best_hypothesis = true`).
    Best(Vec<Hypothesis>),
    /// Full n-best list per sample.
    NBest(Vec<NBestHypotheses>),
}

impl BatchHypotheses {
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Best(h) => h.len(),
            Self::NBest(n) => n.len(),
        }
    }

    /// Best hypothesis for each sample regardless of packing mode.
    pub fn best_per_sample(&self) -> Vec<&Hypothesis> {
        match self {
            Self::Best(h) => h.iter().collect(),
            Self::NBest(n) => n.iter().map(|nb| nb.best()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_state_to_device_preserves_nesting() {
        let t = Tensor::zeros((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let state = DecoderState::List(vec![
            DecoderState::Scalar(1.5),
            DecoderState::Tensor(t),
            DecoderState::List(vec![DecoderState::Scalar(-2.0)]),
        ]);
        let moved = state.to_device(&Device::Cpu).unwrap();
        match moved {
            DecoderState::List(items) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[0], DecoderState::Scalar(v) if v == 1.5));
                assert!(matches!(&items[1], DecoderState::Tensor(t) if t.dims() == [2, 3]));
                assert!(matches!(&items[2], DecoderState::List(inner) if inner.len() == 1));
            }
            other => panic!("expected list state, got {other:?}"),
        }
    }

    #[test]
    fn batch_hypotheses_best_per_sample() {
        let mut a = Hypothesis::empty();
        a.score = 2.0;
        let mut b = Hypothesis::empty();
        b.score = 1.0;
        let batch = BatchHypotheses::NBest(vec![NBestHypotheses(vec![a, b])]);
        assert_eq!(batch.batch_size(), 1);
        assert_eq!(batch.best_per_sample()[0].score, 2.0);
    }
}
