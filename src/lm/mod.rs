pub mod resource;

use std::path::Path;

use crate::error::DecodeError;

/// Packaging format of the configured language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmKind {
    /// No LM configured; decoding runs against the zero language model.
    None,
    /// `kenlm_path` points directly at an LM binary.
    RawBinary,
    /// `kenlm_path` is an archive bundling the LM binary and, optionally,
    /// a lexicon.
    Packaged,
}

impl LmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RawBinary => "raw-binary",
            Self::Packaged => "packaged",
        }
    }
}

/// Word-level statistical language model consumed by the search backends.
///
/// The actual model (e.g. a KenLM binary) is an external collaborator; this
/// trait is the narrow interface it is accessed through.
pub trait LanguageModel: Send + Sync {
    /// Log-probability contribution of `word` following `context`.
    fn score_word(&self, context: &[String], word: &str) -> f32;

    /// Whether the model's word inventory contains `word`.
    fn is_known_word(&self, word: &str) -> bool {
        let _ = word;
        true
    }
}

/// Non-informative LM stand-in used when no model is configured.
///
/// Contributes a constant score term so LM-weighted scoring degenerates to
/// pure acoustic ranking.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroLanguageModel;

impl LanguageModel for ZeroLanguageModel {
    fn score_word(&self, _context: &[String], _word: &str) -> f32 {
        0.0
    }
}

/// Builds a [`LanguageModel`] from resolved on-disk resources.
///
/// Implementations must read everything they need eagerly: for packaged
/// models the paths live in a scoped temporary directory that is deleted
/// before the decode call returns.
pub trait LanguageModelFactory: Send + Sync {
    fn load(
        &self,
        binary_path: &Path,
        lexicon_path: Option<&Path>,
    ) -> Result<Box<dyn LanguageModel>, DecodeError>;
}
