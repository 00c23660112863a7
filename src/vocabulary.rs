use std::collections::HashMap;

use crate::error::DecodeError;

/// Reserved blank placeholder. The blank class lives outside the vocabulary;
/// a vocabulary that lists it explicitly is malformed.
pub const BLANK_TOKEN: &str = "<blank>";

/// Ordered token alphabet with bidirectional token/index maps.
///
/// Index assignment is the token's position in the list handed to `new`,
/// which must match the column order of the model's log-probability output.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    vocab_index_map: HashMap<String, usize>,
    index_vocab_map: HashMap<usize, String>,
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>) -> Result<Self, DecodeError> {
        let mut vocab_index_map = HashMap::with_capacity(tokens.len());
        let mut index_vocab_map = HashMap::with_capacity(tokens.len());
        for (idx, token) in tokens.iter().enumerate() {
            if token == BLANK_TOKEN {
                return Err(DecodeError::configuration(format!(
                    "vocabulary must not contain the reserved blank token `{BLANK_TOKEN}` (position {idx})"
                )));
            }
            if vocab_index_map.insert(token.clone(), idx).is_some() {
                return Err(DecodeError::configuration(format!(
                    "vocabulary contains duplicate token `{token}` (position {idx})"
                )));
            }
            index_vocab_map.insert(idx, token.clone());
        }
        Ok(Self {
            tokens,
            vocab_index_map,
            index_vocab_map,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn vocab_index_map(&self) -> &HashMap<String, usize> {
        &self.vocab_index_map
    }

    pub fn index_vocab_map(&self) -> &HashMap<usize, String> {
        &self.index_vocab_map
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.vocab_index_map.get(token).copied()
    }

    pub fn token_at(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }
}
