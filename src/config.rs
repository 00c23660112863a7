use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DecodeError;

/// Search backend selector.
///
/// `prefix` is the LM-scored, lexicon-free prefix beam search; `lexicon` is
/// the lexicon-constrained token-level beam search. The legacy aliases
/// `beam` and `default` both select the prefix search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[serde(alias = "beam", alias = "default")]
    Prefix,
    Lexicon,
}

impl SearchType {
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        match s.to_lowercase().as_str() {
            "prefix" | "beam" | "default" => Ok(Self::Prefix),
            "lexicon" => Ok(Self::Lexicon),
            other => Err(DecodeError::configuration(format!(
                "unsupported search_type `{other}`; expected one of: prefix, lexicon, beam, default"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Lexicon => "lexicon",
        }
    }
}

/// Tunables specific to the prefix beam search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefixSearchConfig {
    /// Beams scoring more than this far below the running best are dropped.
    pub beam_prune_logp: f32,
    /// Per-frame floor below which a token is not expanded (the frame's
    /// top-scoring token is always kept).
    pub token_min_logp: f32,
    /// Merge beams that share the same recent word history.
    pub prune_history: bool,
    /// Words whose completion receives an additive score boost.
    pub hotwords: Vec<String>,
    pub hotword_weight: f32,
}

impl Default for PrefixSearchConfig {
    fn default() -> Self {
        Self {
            beam_prune_logp: -10.0,
            token_min_logp: -5.0,
            prune_history: false,
            hotwords: Vec::new(),
            hotword_weight: 10.0,
        }
    }
}

/// Tunables specific to the lexicon-constrained search.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LexiconSearchConfig {
    /// Word list constraining the search; one `word [tab] spelling` per line.
    /// Overridden by the lexicon shipped inside a packaged LM, when present.
    pub lexicon_path: Option<PathBuf>,
    /// Boosted words, one `word [tab] weight` per line (weight optional).
    pub boost_path: Option<PathBuf>,
    /// Number of highest-scoring tokens expanded per frame.
    pub beam_size_token: usize,
    /// Beams scoring more than this far below the best are dropped.
    pub beam_threshold: f32,
    /// Additive penalty for words outside the lexicon; `-inf` rejects them.
    pub unk_weight: f32,
    /// Additive weight applied on word-separator frames.
    pub sil_weight: f32,
}

impl Default for LexiconSearchConfig {
    fn default() -> Self {
        Self {
            lexicon_path: None,
            boost_path: None,
            beam_size_token: 16,
            beam_threshold: 20.0,
            unk_weight: f32::NEG_INFINITY,
            sil_weight: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeamDecodingConfig {
    /// Index of the CTC blank class in the model output.
    pub blank_id: usize,
    pub beam_size: usize,
    pub search_type: SearchType,
    /// Collapse each sample's n-best list to its single best hypothesis.
    pub return_best_hypothesis: bool,
    /// Attach the per-sample log-probability snapshot to every hypothesis.
    pub preserve_alignments: bool,
    /// Frame-level timestamp computation; unsupported by beam search and
    /// rejected at construction.
    pub compute_timestamps: bool,
    /// Language model weight.
    pub beam_alpha: f32,
    /// Word insertion weight.
    pub beam_beta: f32,
    /// Path to a packaged LM archive or a raw LM binary.
    pub kenlm_path: Option<PathBuf>,
    pub prefix: PrefixSearchConfig,
    pub lexicon: LexiconSearchConfig,
}

impl Default for BeamDecodingConfig {
    fn default() -> Self {
        Self {
            blank_id: 0,
            beam_size: 4,
            search_type: SearchType::Prefix,
            return_best_hypothesis: true,
            preserve_alignments: false,
            compute_timestamps: false,
            beam_alpha: 1.0,
            beam_beta: 0.0,
            kenlm_path: None,
            prefix: PrefixSearchConfig::default(),
            lexicon: LexiconSearchConfig::default(),
        }
    }
}

impl BeamDecodingConfig {
    pub fn new(blank_id: usize, beam_size: usize) -> Self {
        Self {
            blank_id,
            beam_size,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DecodeError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::io("read decoding config", e))?;
        let cfg: Self = serde_json::from_str(&data)
            .map_err(|e| DecodeError::json("parse decoding config", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.beam_size < 1 {
            return Err(DecodeError::configuration(
                "beam_size cannot be less than 1",
            ));
        }
        if self.compute_timestamps {
            return Err(DecodeError::unsupported(
                "compute_timestamps is not supported by beam search algorithms",
            ));
        }
        Ok(())
    }
}
