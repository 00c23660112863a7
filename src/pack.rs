use candle_core::{Device, Tensor};

use crate::compat::DecodingKind;
use crate::decoder::Tokenizer;
use crate::error::DecodeError;
use crate::search::{CandidateOutput, RawCandidate};
use crate::types::{Hypothesis, NBestHypotheses};
use crate::vocabulary::Vocabulary;

/// Turns raw backend candidates into fully populated hypotheses.
///
/// Backends emit either text or token ids; the assembler derives the missing
/// half, attaches the sample's true length and, when enabled, a shared
/// alignment slice, and migrates any decoder state to host memory.
pub(crate) struct HypothesisAssembler<'a> {
    decoding: DecodingKind,
    vocabulary: &'a Vocabulary,
    tokenizer: Option<&'a dyn Tokenizer>,
    preserve_alignments: bool,
}

impl<'a> HypothesisAssembler<'a> {
    pub(crate) fn new(
        decoding: DecodingKind,
        vocabulary: &'a Vocabulary,
        tokenizer: Option<&'a dyn Tokenizer>,
        preserve_alignments: bool,
    ) -> Self {
        Self {
            decoding,
            vocabulary,
            tokenizer,
            preserve_alignments,
        }
    }

    /// Pack one n-best list per sample. `host_log_probs` must be the `[B, T,
    /// V+1]` batch on the CPU device; alignment slices are narrowed out of it.
    pub(crate) fn assemble_batch(
        &self,
        candidates: Vec<Vec<RawCandidate>>,
        lengths: &[usize],
        host_log_probs: &Tensor,
    ) -> Result<Vec<NBestHypotheses>, DecodeError> {
        let mut packed = Vec::with_capacity(candidates.len());
        for (sample_idx, (sample_candidates, &len)) in
            candidates.into_iter().zip(lengths).enumerate()
        {
            let alignment = if self.preserve_alignments {
                let slice = host_log_probs
                    .get(sample_idx)
                    .and_then(|t| t.narrow(0, 0, len))
                    .map_err(|e| DecodeError::runtime("slice alignment frames", e))?;
                Some(slice)
            } else {
                None
            };
            let mut hypotheses = Vec::with_capacity(sample_candidates.len());
            for candidate in sample_candidates {
                hypotheses.push(self.assemble_one(candidate, len, alignment.clone())?);
            }
            packed.push(NBestHypotheses(hypotheses));
        }
        Ok(packed)
    }

    fn assemble_one(
        &self,
        candidate: RawCandidate,
        len: usize,
        alignment: Option<Tensor>,
    ) -> Result<Hypothesis, DecodeError> {
        let (text, token_ids) = match candidate.output {
            CandidateOutput::Text(text) => {
                let ids = self.text_to_ids(&text)?;
                (text, ids)
            }
            CandidateOutput::TokenIds(ids) => {
                let text = self.ids_to_text(&ids)?;
                (text, ids)
            }
        };
        let decoder_state = candidate
            .decoder_state
            .map(|s| s.to_device(&Device::Cpu))
            .transpose()?;
        Ok(Hypothesis {
            score: candidate.score,
            token_ids,
            text,
            word_spans: candidate.word_spans,
            alignment,
            decoder_state,
            length: len as u32,
        })
    }

    fn text_to_ids(&self, text: &str) -> Result<Vec<usize>, DecodeError> {
        match self.decoding {
            DecodingKind::Subword => Ok(match self.tokenizer {
                Some(tokenizer) => tokenizer.text_to_ids(text),
                None => Vec::new(),
            }),
            DecodingKind::Char => {
                let pipe_separator = self.vocabulary.index_of(" ").is_none();
                let mut ids = Vec::new();
                for c in text.chars() {
                    // Word boundaries come back as plain spaces even for
                    // pipe-separated alphabets.
                    let id = if c == ' ' && pipe_separator {
                        self.vocabulary.index_of("|")
                    } else {
                        self.vocabulary.index_of(c.to_string().as_str())
                    };
                    let id = id.ok_or_else(|| {
                        DecodeError::runtime(
                            "encode candidate text",
                            format!("character `{c}` outside the vocabulary"),
                        )
                    })?;
                    ids.push(id);
                }
                Ok(ids)
            }
        }
    }

    fn ids_to_text(&self, ids: &[usize]) -> Result<String, DecodeError> {
        match self.decoding {
            DecodingKind::Subword => match self.tokenizer {
                Some(tokenizer) => Ok(tokenizer.ids_to_text(ids)),
                None => Ok(String::new()),
            },
            DecodingKind::Char => {
                let mut text = String::new();
                for &id in ids {
                    let token = self.vocabulary.token_at(id).ok_or_else(|| {
                        DecodeError::runtime(
                            "render candidate text",
                            format!("token id {id} outside the vocabulary"),
                        )
                    })?;
                    if token == "|" {
                        text.push(' ');
                    } else {
                        text.push_str(token);
                    }
                }
                Ok(text)
            }
        }
    }
}
