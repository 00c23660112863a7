use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::config::LexiconSearchConfig;
use crate::error::DecodeError;
use crate::lm::LanguageModel;
use crate::search::{
    column_to_vocab_index, log_sum_exp, CandidateOutput, RawCandidate, SearchBackend,
};

const SUBWORD_BOUNDARY: char = '\u{2581}';
/// Offset used to remap subword indices into a printable char alphabet so a
/// word-oriented LM built from packaged models can score them.
pub const TOKEN_OFFSET: u32 = 100;
/// Boost applied to words listed without an explicit weight.
const DEFAULT_BOOST_WEIGHT: f32 = 10.0;

/// Map every vocabulary index to a distinct single-char string.
///
/// The mapping is `char(index + TOKEN_OFFSET)`, reversible by subtracting the
/// offset from the char's code point.
pub fn remap_vocabulary(len: usize) -> Result<Vec<String>, DecodeError> {
    (0..len)
        .map(|i| {
            char::from_u32(TOKEN_OFFSET + i as u32)
                .map(|c| c.to_string())
                .ok_or_else(|| {
                    DecodeError::configuration(format!(
                        "vocabulary too large for char remapping ({len} tokens)"
                    ))
                })
        })
        .collect()
}

/// Permissible words with all their proper prefixes precomputed, so partial
/// words can be pruned as soon as they leave the lexicon.
#[derive(Debug, Default)]
struct Lexicon {
    words: HashSet<String>,
    prefixes: HashSet<String>,
}

impl Lexicon {
    fn load(path: &Path) -> Result<Self, DecodeError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| DecodeError::io("read lexicon file", e))?;
        let mut lexicon = Self::default();
        for line in data.lines() {
            // `word [tab] spelling...`; only the headword constrains search.
            let Some(word) = line.split_whitespace().next() else {
                continue;
            };
            for (pos, _) in word.char_indices() {
                lexicon.prefixes.insert(word[..pos].to_string());
            }
            lexicon.prefixes.insert(word.to_string());
            lexicon.words.insert(word.to_string());
        }
        Ok(lexicon)
    }

    fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    fn is_viable_prefix(&self, partial: &str) -> bool {
        self.prefixes.contains(partial)
    }
}

fn load_boosts(path: &Path) -> Result<HashMap<String, f32>, DecodeError> {
    let data =
        std::fs::read_to_string(path).map_err(|e| DecodeError::io("read boost file", e))?;
    let mut boosts = HashMap::new();
    for line in data.lines() {
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else { continue };
        let weight = fields
            .next()
            .and_then(|w| w.parse::<f32>().ok())
            .unwrap_or(DEFAULT_BOOST_WEIGHT);
        boosts.insert(word.to_string(), weight);
    }
    Ok(boosts)
}

/// Token-level, optionally lexicon-constrained CTC beam search.
///
/// Candidates carry their token-id sequences directly; no text round trip is
/// needed. Words outside the lexicon are penalized by `unk_weight` and
/// rejected outright when it is `-inf`; separator emissions add `sil_weight`;
/// boosted words receive their configured additive bonus on completion.
pub struct LexiconBeamSearch {
    blank_id: usize,
    beam_size: usize,
    lm_weight: f32,
    word_score: f32,
    cfg: LexiconSearchConfig,
    vocab: Vec<String>,
    subword: bool,
    /// LM-space rendering of each vocabulary token, when remapping is active.
    remap: Option<Vec<String>>,
    lexicon: Option<Lexicon>,
    boosts: HashMap<String, f32>,
    lm: Arc<dyn LanguageModel>,
}

#[derive(Debug, Clone)]
struct LexBeam {
    prefix: Vec<usize>,
    p_b: f32,
    p_nb: f32,
    /// LM, word-score, silence and boost contributions.
    extra: f32,
    words: Vec<String>,
    lm_words: Vec<String>,
    cur_word: String,
    cur_lm_word: String,
}

impl LexBeam {
    fn root() -> Self {
        Self {
            prefix: Vec::new(),
            p_b: 0.0,
            p_nb: f32::NEG_INFINITY,
            extra: 0.0,
            words: Vec::new(),
            lm_words: Vec::new(),
            cur_word: String::new(),
            cur_lm_word: String::new(),
        }
    }

    fn score(&self) -> f32 {
        log_sum_exp(self.p_b, self.p_nb) + self.extra
    }
}

impl LexiconBeamSearch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vocab: Vec<String>,
        blank_id: usize,
        beam_size: usize,
        lm_weight: f32,
        word_score: f32,
        subword: bool,
        remap_to_chars: bool,
        cfg: LexiconSearchConfig,
        lexicon_path: Option<&Path>,
        lm: Arc<dyn LanguageModel>,
        compute_timestamps: bool,
    ) -> Result<Self, DecodeError> {
        if compute_timestamps {
            return Err(DecodeError::unsupported(
                "lexicon beam search does not support timestamp computation",
            ));
        }
        if blank_id > vocab.len() {
            return Err(DecodeError::configuration(format!(
                "blank_id {} outside the {} log-prob columns",
                blank_id,
                vocab.len() + 1
            )));
        }
        let remap = if remap_to_chars {
            Some(remap_vocabulary(vocab.len())?)
        } else {
            None
        };
        let lexicon = lexicon_path.map(Lexicon::load).transpose()?;
        let boosts = match &cfg.boost_path {
            Some(path) => load_boosts(path)?,
            None => HashMap::new(),
        };
        Ok(Self {
            blank_id,
            beam_size,
            lm_weight,
            word_score,
            cfg,
            vocab,
            subword,
            remap,
            lexicon,
            boosts,
            lm,
        })
    }

    /// Top `beam_size_token` columns for a frame; the blank is always kept so
    /// every beam retains a survivor continuation.
    fn frame_candidates(&self, frame: &[f32]) -> Vec<(usize, f32)> {
        let mut indexed: Vec<(usize, f32)> = frame.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(self.cfg.beam_size_token.max(1));
        if !indexed.iter().any(|&(c, _)| c == self.blank_id) {
            indexed.push((self.blank_id, frame[self.blank_id]));
        }
        indexed
    }

    /// Close the beam's partial word, applying lexicon, LM, boost and word
    /// score terms. Returns false when the word is rejected outright.
    fn complete_word(&self, b: &mut LexBeam) -> bool {
        if b.cur_word.is_empty() {
            return true;
        }
        let word = std::mem::take(&mut b.cur_word);
        let lm_word = std::mem::take(&mut b.cur_lm_word);
        if let Some(lexicon) = &self.lexicon {
            if !lexicon.contains(&word) {
                if self.cfg.unk_weight == f32::NEG_INFINITY {
                    return false;
                }
                b.extra += self.cfg.unk_weight;
            }
        }
        let scored = if self.remap.is_some() { &lm_word } else { &word };
        let context = if self.remap.is_some() {
            &b.lm_words
        } else {
            &b.words
        };
        b.extra += self.lm_weight * self.lm.score_word(context, scored) + self.word_score;
        if let Some(boost) = self.boosts.get(&word) {
            b.extra += boost;
        }
        b.words.push(word);
        b.lm_words.push(lm_word);
        true
    }

    /// Extend a beam with label `v`. Returns `None` when the extension is
    /// pruned by the lexicon constraint.
    fn apply_token(&self, base: &LexBeam, v: usize) -> Option<LexBeam> {
        let mut b = base.clone();
        b.prefix.push(v);
        let tok = &self.vocab[v];
        let lm_piece = self.remap.as_ref().map(|r| r[v].as_str());
        if self.subword {
            if let Some(rest) = tok.strip_prefix(SUBWORD_BOUNDARY) {
                if !self.complete_word(&mut b) {
                    return None;
                }
                b.cur_word.push_str(rest);
            } else {
                b.cur_word.push_str(tok);
            }
            b.cur_lm_word.push_str(lm_piece.unwrap_or(tok));
        } else if tok == " " || tok == "|" {
            b.extra += self.cfg.sil_weight;
            if !self.complete_word(&mut b) {
                return None;
            }
            return Some(b);
        } else {
            b.cur_word.push_str(tok);
            b.cur_lm_word.push_str(lm_piece.unwrap_or(tok));
        }
        if let Some(lexicon) = &self.lexicon {
            if self.cfg.unk_weight == f32::NEG_INFINITY && !lexicon.is_viable_prefix(&b.cur_word) {
                return None;
            }
        }
        Some(b)
    }

    fn prune(&self, next: HashMap<Vec<usize>, LexBeam>) -> Vec<LexBeam> {
        let mut beams: Vec<LexBeam> = next.into_values().collect();
        beams.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        if let Some(best) = beams.first().map(LexBeam::score) {
            let floor = best - self.cfg.beam_threshold;
            beams.retain(|b| b.score() >= floor);
        }
        beams.truncate(self.beam_size);
        beams
    }

    fn decode_sample(&self, sample: &[Vec<f32>], len: usize) -> Vec<RawCandidate> {
        let mut beams = vec![LexBeam::root()];
        for frame in sample.iter().take(len) {
            let candidates = self.frame_candidates(frame);
            let mut next: HashMap<Vec<usize>, LexBeam> = HashMap::new();
            for beam in &beams {
                for &(col, lp) in &candidates {
                    match column_to_vocab_index(col, self.blank_id) {
                        None => {
                            let p = log_sum_exp(beam.p_b, beam.p_nb) + lp;
                            let entry = next.entry(beam.prefix.clone()).or_insert_with(|| {
                                let mut b = beam.clone();
                                b.p_b = f32::NEG_INFINITY;
                                b.p_nb = f32::NEG_INFINITY;
                                b
                            });
                            entry.p_b = log_sum_exp(entry.p_b, p);
                        }
                        Some(v) if beam.prefix.last() == Some(&v) => {
                            let stay = beam.p_nb + lp;
                            let entry = next.entry(beam.prefix.clone()).or_insert_with(|| {
                                let mut b = beam.clone();
                                b.p_b = f32::NEG_INFINITY;
                                b.p_nb = f32::NEG_INFINITY;
                                b
                            });
                            entry.p_nb = log_sum_exp(entry.p_nb, stay);
                            if beam.p_b != f32::NEG_INFINITY {
                                if let Some(ext) = self.apply_token(beam, v) {
                                    let again = beam.p_b + lp;
                                    let entry =
                                        next.entry(ext.prefix.clone()).or_insert_with(|| {
                                            let mut b = ext.clone();
                                            b.p_b = f32::NEG_INFINITY;
                                            b.p_nb = f32::NEG_INFINITY;
                                            b
                                        });
                                    entry.p_nb = log_sum_exp(entry.p_nb, again);
                                }
                            }
                        }
                        Some(v) => {
                            if let Some(ext) = self.apply_token(beam, v) {
                                let p = log_sum_exp(beam.p_b, beam.p_nb) + lp;
                                let entry = next.entry(ext.prefix.clone()).or_insert_with(|| {
                                    let mut b = ext.clone();
                                    b.p_b = f32::NEG_INFINITY;
                                    b.p_nb = f32::NEG_INFINITY;
                                    b
                                });
                                entry.p_nb = log_sum_exp(entry.p_nb, p);
                            }
                        }
                    }
                }
            }
            beams = self.prune(next);
        }

        let mut finalized: Vec<LexBeam> = beams
            .into_iter()
            .filter_map(|mut b| self.complete_word(&mut b).then_some(b))
            .collect();
        if finalized.is_empty() {
            // Lexicon rejection can kill every trailing partial word; the
            // empty hypothesis is still a valid (if silent) transcription.
            finalized.push(LexBeam::root());
        }
        finalized.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        finalized
            .into_iter()
            .map(|b| RawCandidate {
                score: b.score(),
                output: CandidateOutput::TokenIds(b.prefix),
                word_spans: Vec::new(),
                decoder_state: None,
            })
            .collect()
    }
}

impl SearchBackend for LexiconBeamSearch {
    fn search(
        &mut self,
        log_probs: &[Vec<Vec<f32>>],
        lengths: &[usize],
    ) -> Result<Vec<Vec<RawCandidate>>, DecodeError> {
        let width = self.vocab.len() + 1;
        let mut results = Vec::with_capacity(log_probs.len());
        for (sample, &len) in log_probs.iter().zip(lengths) {
            if let Some(frame) = sample.first() {
                if frame.len() != width {
                    return Err(DecodeError::configuration(format!(
                        "log-prob frames have {} columns, expected {} (vocabulary + blank)",
                        frame.len(),
                        width
                    )));
                }
            }
            results.push(self.decode_sample(sample, len));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::ZeroLanguageModel;

    fn backend(
        vocab: &[&str],
        blank_id: usize,
        beam_size: usize,
        cfg: LexiconSearchConfig,
        lexicon_path: Option<&Path>,
    ) -> LexiconBeamSearch {
        LexiconBeamSearch::new(
            vocab.iter().map(|t| t.to_string()).collect(),
            blank_id,
            beam_size,
            1.0,
            0.0,
            false,
            false,
            cfg,
            lexicon_path,
            Arc::new(ZeroLanguageModel),
            false,
        )
        .expect("backend construction")
    }

    fn token_ids(candidate: &RawCandidate) -> &[usize] {
        match &candidate.output {
            CandidateOutput::TokenIds(ids) => ids,
            other => panic!("expected token ids, got {other:?}"),
        }
    }

    // Columns: [a, b, blank]
    fn sample_ab() -> Vec<Vec<f32>> {
        vec![
            vec![-0.1, -4.0, -3.0],
            vec![-3.0, -4.0, -0.1],
            vec![-4.0, -0.1, -3.0],
        ]
    }

    #[test]
    fn emits_native_token_ids() {
        let mut search = backend(&["a", "b"], 2, 4, LexiconSearchConfig::default(), None);
        let results = search.search(&[sample_ab()], &[3]).unwrap();
        let candidates = &results[0];
        assert!(!candidates.is_empty());
        assert_eq!(token_ids(&candidates[0]), &[0, 1]);
        for candidate in candidates {
            assert!(token_ids(candidate).iter().all(|&id| id < 2));
        }
        for pair in candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn lexicon_constrains_words() {
        let dir = tempfile::tempdir().unwrap();
        let lexicon_path = dir.path().join("words.lexicon");
        std::fs::write(&lexicon_path, "ab a b |\n").unwrap();
        // Acoustics favor "ba", which the lexicon forbids.
        let sample = vec![vec![-1.0, -0.1, -3.0], vec![-0.1, -1.0, -3.0]];
        let mut search = backend(
            &["a", "b"],
            2,
            8,
            LexiconSearchConfig::default(),
            Some(&lexicon_path),
        );
        let results = search.search(&[sample], &[2]).unwrap();
        assert_eq!(token_ids(&results[0][0]), &[0, 1]);
    }

    #[test]
    fn finite_unk_weight_admits_unknown_words() {
        let dir = tempfile::tempdir().unwrap();
        let lexicon_path = dir.path().join("words.lexicon");
        std::fs::write(&lexicon_path, "ab a b |\n").unwrap();
        let sample = vec![vec![-1.0, -0.1, -3.0], vec![-0.1, -1.0, -3.0]];
        let cfg = LexiconSearchConfig {
            unk_weight: -0.5,
            ..LexiconSearchConfig::default()
        };
        let mut search = backend(&["a", "b"], 2, 8, cfg, Some(&lexicon_path));
        let results = search.search(&[sample], &[2]).unwrap();
        // "ba" survives with the penalty and still wins acoustically
        // (margin 1.8 vs the 0.5 penalty).
        assert_eq!(token_ids(&results[0][0]), &[1, 0]);
    }

    #[test]
    fn boost_file_reorders_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let boost_path = dir.path().join("boost.txt");
        std::fs::write(&boost_path, "b\t10.0\n").unwrap();
        let sample = vec![vec![-0.6, -0.7, -3.0]];
        let cfg = LexiconSearchConfig {
            boost_path: Some(boost_path),
            ..LexiconSearchConfig::default()
        };
        let mut search = backend(&["a", "b"], 2, 4, cfg, None);
        let results = search.search(&[sample], &[1]).unwrap();
        assert_eq!(token_ids(&results[0][0]), &[1]);
    }

    #[test]
    fn remapped_vocabulary_is_reversible() {
        let remapped = remap_vocabulary(64).unwrap();
        assert_eq!(remapped.len(), 64);
        for (idx, s) in remapped.iter().enumerate() {
            let mut chars = s.chars();
            let c = chars.next().expect("one char");
            assert!(chars.next().is_none());
            assert_eq!(c as u32 - TOKEN_OFFSET, idx as u32);
        }
    }

    #[test]
    fn compute_timestamps_rejected_at_construction() {
        let err = LexiconBeamSearch::new(
            vec!["a".to_string()],
            1,
            4,
            1.0,
            0.0,
            false,
            false,
            LexiconSearchConfig::default(),
            None,
            Arc::new(ZeroLanguageModel),
            true,
        )
        .err()
        .expect("construction should fail");
        assert!(matches!(err, DecodeError::UnsupportedConfiguration { .. }));
    }
}
