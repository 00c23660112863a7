use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::PrefixSearchConfig;
use crate::error::DecodeError;
use crate::lm::LanguageModel;
use crate::search::{
    column_to_vocab_index, log_sum_exp, CandidateOutput, RawCandidate, SearchBackend,
};
use crate::types::WordSpan;

/// Subword tokens starting with this marker open a new word.
const SUBWORD_BOUNDARY: char = '\u{2581}';
/// Number of trailing words compared when merging beams by history.
const HISTORY_WORDS: usize = 8;

/// LM-scored, lexicon-free CTC prefix beam search.
///
/// Beams are keyed by their collapsed label sequence; equal prefixes reached
/// through different frame paths are merged with log-sum-exp over the
/// blank/non-blank ending probabilities. Each completed word contributes
/// `beam_alpha * lm + beam_beta` to the beam score, hotwords an additional
/// flat boost. Deterministic for fixed parameters: ties are broken on the
/// prefix itself.
pub struct PrefixBeamSearch {
    blank_id: usize,
    beam_size: usize,
    beam_alpha: f32,
    beam_beta: f32,
    cfg: PrefixSearchConfig,
    vocab: Vec<String>,
    subword: bool,
    hotwords: HashSet<String>,
    lm: Arc<dyn LanguageModel>,
}

#[derive(Debug, Clone)]
struct Beam {
    /// Collapsed vocabulary indices decoded so far.
    prefix: Vec<usize>,
    /// Log-probability of the paths ending in blank.
    p_b: f32,
    /// Log-probability of the paths ending in the prefix's last label.
    p_nb: f32,
    /// Accumulated weighted LM + word-bonus contributions.
    lm_score: f32,
    words: Vec<WordSpan>,
    cur_word: String,
    word_start: Option<usize>,
    word_end: usize,
}

impl Beam {
    fn root() -> Self {
        Self {
            prefix: Vec::new(),
            p_b: 0.0,
            p_nb: f32::NEG_INFINITY,
            lm_score: 0.0,
            words: Vec::new(),
            cur_word: String::new(),
            word_start: None,
            word_end: 0,
        }
    }

    fn score(&self) -> f32 {
        log_sum_exp(self.p_b, self.p_nb) + self.lm_score
    }

    fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PrefixBeamSearch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vocab: Vec<String>,
        blank_id: usize,
        beam_size: usize,
        beam_alpha: f32,
        beam_beta: f32,
        subword: bool,
        cfg: PrefixSearchConfig,
        lm: Arc<dyn LanguageModel>,
        compute_timestamps: bool,
    ) -> Result<Self, DecodeError> {
        if compute_timestamps {
            return Err(DecodeError::unsupported(
                "prefix beam search does not support timestamp computation",
            ));
        }
        if blank_id > vocab.len() {
            return Err(DecodeError::configuration(format!(
                "blank_id {} outside the {} log-prob columns",
                blank_id,
                vocab.len() + 1
            )));
        }
        let hotwords = cfg.hotwords.iter().cloned().collect();
        Ok(Self {
            blank_id,
            beam_size,
            beam_alpha,
            beam_beta,
            cfg,
            vocab,
            subword,
            hotwords,
            lm,
        })
    }

    /// Columns expanded for one frame: everything at or above the token
    /// floor, plus the frame argmax and the blank (the blank continuation
    /// keeps every beam alive regardless of pruning).
    fn frame_candidates(&self, frame: &[f32]) -> Vec<(usize, f32)> {
        let argmax = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(c, _)| c)
            .unwrap_or(self.blank_id);
        frame
            .iter()
            .enumerate()
            .filter(|&(c, &lp)| c == argmax || c == self.blank_id || lp >= self.cfg.token_min_logp)
            .map(|(c, &lp)| (c, lp))
            .collect()
    }

    /// Word bookkeeping for appending label `v` at frame `t`.
    fn apply_token(&self, base: &Beam, v: usize, t: usize) -> Beam {
        let mut b = base.clone();
        b.prefix.push(v);
        let tok = &self.vocab[v];
        if self.subword {
            if let Some(rest) = tok.strip_prefix(SUBWORD_BOUNDARY) {
                self.complete_word(&mut b);
                if !rest.is_empty() {
                    b.cur_word.push_str(rest);
                    b.word_start = Some(t);
                    b.word_end = t;
                }
            } else {
                if b.cur_word.is_empty() {
                    b.word_start = Some(t);
                }
                b.cur_word.push_str(tok);
                b.word_end = t;
            }
        } else if tok == " " || tok == "|" {
            self.complete_word(&mut b);
        } else {
            if b.cur_word.is_empty() {
                b.word_start = Some(t);
            }
            b.cur_word.push_str(tok);
            b.word_end = t;
        }
        b
    }

    fn complete_word(&self, b: &mut Beam) {
        if b.cur_word.is_empty() {
            b.word_start = None;
            return;
        }
        let word = std::mem::take(&mut b.cur_word);
        let context: Vec<String> = b.words.iter().map(|w| w.word.clone()).collect();
        let mut contribution = self.beam_alpha * self.lm.score_word(&context, &word) + self.beam_beta;
        if self.hotwords.contains(&word) {
            contribution += self.cfg.hotword_weight;
        }
        b.lm_score += contribution;
        b.words.push(WordSpan {
            word,
            start_frame: b.word_start.unwrap_or(b.word_end),
            end_frame: b.word_end,
        });
        b.word_start = None;
    }

    fn history_key(b: &Beam) -> String {
        let tail: Vec<&str> = b
            .words
            .iter()
            .rev()
            .take(HISTORY_WORDS)
            .map(|w| w.word.as_str())
            .collect();
        format!("{}\u{1}{}", tail.join(" "), b.cur_word)
    }

    fn prune(&self, next: HashMap<Vec<usize>, Beam>) -> Vec<Beam> {
        let mut beams: Vec<Beam> = next.into_values().collect();
        beams.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        if self.cfg.prune_history {
            let mut seen = HashSet::new();
            beams.retain(|b| seen.insert(Self::history_key(b)));
        }
        if let Some(best) = beams.first().map(Beam::score) {
            let floor = best + self.cfg.beam_prune_logp;
            beams.retain(|b| b.score() >= floor);
        }
        beams.truncate(self.beam_size);
        beams
    }

    fn decode_sample(&self, sample: &[Vec<f32>], len: usize) -> Vec<RawCandidate> {
        let mut beams = vec![Beam::root()];
        for (t, frame) in sample.iter().take(len).enumerate() {
            let candidates = self.frame_candidates(frame);
            let mut next: HashMap<Vec<usize>, Beam> = HashMap::new();
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
                            // Staying in the last label keeps the prefix.
                            let stay = beam.p_nb + lp;
                            let entry = next.entry(beam.prefix.clone()).or_insert_with(|| {
                                let mut b = beam.clone();
                                b.p_b = f32::NEG_INFINITY;
                                b.p_nb = f32::NEG_INFINITY;
                                b
                            });
                            entry.p_nb = log_sum_exp(entry.p_nb, stay);
                            // A repeat after a blank emits a fresh label.
                            let again = beam.p_b + lp;
                            if again != f32::NEG_INFINITY {
                                let ext = self.apply_token(beam, v, t);
                                let entry = next.entry(ext.prefix.clone()).or_insert_with(|| {
                                    let mut b = ext.clone();
                                    b.p_b = f32::NEG_INFINITY;
                                    b.p_nb = f32::NEG_INFINITY;
                                    b
                                });
                                entry.p_nb = log_sum_exp(entry.p_nb, again);
                            }
                        }
                        Some(v) => {
                            let p = log_sum_exp(beam.p_b, beam.p_nb) + lp;
                            let ext = self.apply_token(beam, v, t);
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
            beams = self.prune(next);
        }

        for beam in &mut beams {
            self.complete_word(beam);
        }
        beams.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        beams
            .into_iter()
            .map(|b| RawCandidate {
                score: b.score(),
                output: CandidateOutput::Text(b.text()),
                word_spans: b.words,
                decoder_state: None,
            })
            .collect()
    }
}

impl SearchBackend for PrefixBeamSearch {
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
        cfg: PrefixSearchConfig,
    ) -> PrefixBeamSearch {
        PrefixBeamSearch::new(
            vocab.iter().map(|t| t.to_string()).collect(),
            blank_id,
            beam_size,
            1.0,
            0.0,
            false,
            cfg,
            Arc::new(ZeroLanguageModel),
            false,
        )
        .expect("backend construction")
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
    fn best_candidate_matches_dominant_path() {
        let mut search = backend(&["a", "b"], 2, 4, PrefixSearchConfig::default());
        let results = search.search(&[sample_ab()], &[3]).unwrap();
        assert_eq!(results.len(), 1);
        let candidates = &results[0];
        assert!(!candidates.is_empty());
        match &candidates[0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "ab"),
            other => panic!("expected text output, got {other:?}"),
        }
        for pair in candidates.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn beam_size_one_returns_single_candidate() {
        let mut search = backend(&["a", "b"], 2, 1, PrefixSearchConfig::default());
        let results = search.search(&[sample_ab()], &[3]).unwrap();
        assert_eq!(results[0].len(), 1);
    }

    #[test]
    fn word_spans_cover_emitting_frames() {
        let mut search = backend(&["a", "b"], 2, 4, PrefixSearchConfig::default());
        let results = search.search(&[sample_ab()], &[3]).unwrap();
        let spans = &results[0][0].word_spans;
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].word, "ab");
        assert_eq!(spans[0].start_frame, 0);
        assert_eq!(spans[0].end_frame, 2);
    }

    #[test]
    fn separator_token_splits_words() {
        // Columns: [a, space, blank]; path: a, space, a
        let sample = vec![
            vec![-0.1, -5.0, -4.0],
            vec![-5.0, -0.1, -4.0],
            vec![-0.1, -5.0, -4.0],
        ];
        let mut search = backend(&["a", " "], 2, 4, PrefixSearchConfig::default());
        let results = search.search(&[sample], &[3]).unwrap();
        match &results[0][0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "a a"),
            other => panic!("expected text output, got {other:?}"),
        }
        assert_eq!(results[0][0].word_spans.len(), 2);
    }

    #[test]
    fn hotword_boost_reorders_candidates() {
        // One frame where `a` narrowly beats `b` acoustically.
        let sample = vec![vec![-0.6, -0.7, -3.0]];
        let plain = backend(&["a", "b"], 2, 4, PrefixSearchConfig::default())
            .search(&[sample.clone()], &[1])
            .unwrap();
        match &plain[0][0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "a"),
            other => panic!("expected text output, got {other:?}"),
        }

        let cfg = PrefixSearchConfig {
            hotwords: vec!["b".to_string()],
            hotword_weight: 10.0,
            ..PrefixSearchConfig::default()
        };
        let boosted = backend(&["a", "b"], 2, 4, cfg)
            .search(&[sample], &[1])
            .unwrap();
        match &boosted[0][0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "b"),
            other => panic!("expected text output, got {other:?}"),
        }
    }

    #[test]
    fn length_restricts_decoded_frames() {
        // Third frame strongly favors `b` but is past the valid length.
        let mut search = backend(&["a", "b"], 2, 4, PrefixSearchConfig::default());
        let results = search.search(&[sample_ab()], &[1]).unwrap();
        match &results[0][0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "a"),
            other => panic!("expected text output, got {other:?}"),
        }
    }

    #[test]
    fn subword_boundary_marker_starts_new_word() {
        let vocab = vec!["\u{2581}he".to_string(), "llo".to_string()];
        let mut search = PrefixBeamSearch::new(
            vocab,
            2,
            4,
            1.0,
            0.0,
            true,
            PrefixSearchConfig::default(),
            Arc::new(ZeroLanguageModel),
            false,
        )
        .unwrap();
        let sample = vec![vec![-0.1, -5.0, -4.0], vec![-5.0, -0.1, -4.0]];
        let results = search.search(&[sample], &[2]).unwrap();
        match &results[0][0].output {
            CandidateOutput::Text(text) => assert_eq!(text, "hello"),
            other => panic!("expected text output, got {other:?}"),
        }
    }

    #[test]
    fn compute_timestamps_rejected_at_construction() {
        let err = PrefixBeamSearch::new(
            vec!["a".to_string()],
            1,
            4,
            1.0,
            0.0,
            false,
            PrefixSearchConfig::default(),
            Arc::new(ZeroLanguageModel),
            true,
        )
        .err()
        .expect("construction should fail");
        assert!(matches!(err, DecodeError::UnsupportedConfiguration { .. }));
    }
}
