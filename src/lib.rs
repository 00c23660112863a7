pub mod compat;
pub mod config;
pub mod decoder;
pub mod error;
pub mod lm;
mod pack;
pub mod search;
pub mod types;
pub mod vocabulary;

pub use compat::{validate_decoding_compatibility, DecodingKind};
pub use config::{BeamDecodingConfig, LexiconSearchConfig, PrefixSearchConfig, SearchType};
pub use decoder::{BeamCtcDecoder, Tokenizer};
pub use error::DecodeError;
pub use lm::{LanguageModel, LanguageModelFactory, LmKind, ZeroLanguageModel};
pub use types::{BatchHypotheses, DecoderState, Hypothesis, NBestHypotheses, WordSpan};
pub use vocabulary::{Vocabulary, BLANK_TOKEN};
