use crate::config::SearchType;
use crate::error::DecodeError;
use crate::lm::LmKind;

/// Vocabulary granularity of the decoding framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingKind {
    Char,
    Subword,
}

impl DecodingKind {
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        match s.to_lowercase().as_str() {
            "char" => Ok(Self::Char),
            "subword" => Ok(Self::Subword),
            other => Err(DecodeError::configuration(format!(
                "unsupported decoding type `{other}`; supported types: char, subword"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Subword => "subword",
        }
    }
}

/// Outcome of one compatibility rule.
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Accept,
    Reject(&'static str),
}

/// Exhaustive compatibility matrix over (backend, decoding kind, LM kind).
///
/// Each backend integrates the language model differently (word-level lexicon
/// vs. character-level scoring), and subword vocabularies additionally need a
/// reversible char remapping when paired with a word-oriented LM format.
/// Every combination is listed explicitly so the matrix is testable on its
/// own rather than scattered across branch logic.
const RULES: &[(SearchType, DecodingKind, LmKind, Verdict)] = &[
    // Lexicon search, subword vocabulary.
    (SearchType::Lexicon, DecodingKind::Subword, LmKind::None, Verdict::Accept),
    (SearchType::Lexicon, DecodingKind::Subword, LmKind::Packaged, Verdict::Accept),
    (
        SearchType::Lexicon,
        DecodingKind::Subword,
        LmKind::RawBinary,
        Verdict::Reject(
            "lexicon search with a subword model and a raw binary LM requires the lexicon \
             shipped inside a packaged model; raw binaries cannot supply one",
        ),
    ),
    // Prefix search, subword vocabulary.
    (
        SearchType::Prefix,
        DecodingKind::Subword,
        LmKind::None,
        Verdict::Reject("prefix search with a subword model requires a language model (set kenlm_path)"),
    ),
    (
        SearchType::Prefix,
        DecodingKind::Subword,
        LmKind::Packaged,
        Verdict::Reject(
            "prefix search with a subword model does not support a packaged LM; \
             supply the raw LM binary instead",
        ),
    ),
    (SearchType::Prefix, DecodingKind::Subword, LmKind::RawBinary, Verdict::Accept),
    // Lexicon search, char vocabulary: any LM kind, with or without lexicon.
    (SearchType::Lexicon, DecodingKind::Char, LmKind::None, Verdict::Accept),
    (SearchType::Lexicon, DecodingKind::Char, LmKind::RawBinary, Verdict::Accept),
    (SearchType::Lexicon, DecodingKind::Char, LmKind::Packaged, Verdict::Accept),
    // Prefix search, char vocabulary: LM required, both packagings work.
    (
        SearchType::Prefix,
        DecodingKind::Char,
        LmKind::None,
        Verdict::Reject("prefix search with a char model requires a language model (set kenlm_path)"),
    ),
    (SearchType::Prefix, DecodingKind::Char, LmKind::RawBinary, Verdict::Accept),
    (SearchType::Prefix, DecodingKind::Char, LmKind::Packaged, Verdict::Accept),
];

/// Validate a (backend, decoding kind, LM kind) tuple against the matrix.
///
/// Deterministic and idempotent; re-run whenever the decoding type or search
/// backend changes and again on decode entry.
pub fn validate_decoding_compatibility(
    search: SearchType,
    decoding: DecodingKind,
    lm: LmKind,
) -> Result<(), DecodeError> {
    for (s, d, l, verdict) in RULES {
        if *s == search && *d == decoding && *l == lm {
            return match verdict {
                Verdict::Accept => Ok(()),
                Verdict::Reject(reason) => Err(DecodeError::unsupported(*reason)),
            };
        }
    }
    // The table is exhaustive over the three enums; reaching this means a new
    // enum variant was added without a rule.
    Err(DecodeError::unsupported(format!(
        "no compatibility rule for search={} decoding={} lm={}",
        search.as_str(),
        decoding.as_str(),
        lm.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_SEARCH: [SearchType; 2] = [SearchType::Prefix, SearchType::Lexicon];
    const ALL_DECODING: [DecodingKind; 2] = [DecodingKind::Char, DecodingKind::Subword];
    const ALL_LM: [LmKind; 3] = [LmKind::None, LmKind::RawBinary, LmKind::Packaged];

    #[test]
    fn table_covers_every_combination() {
        for s in ALL_SEARCH {
            for d in ALL_DECODING {
                for l in ALL_LM {
                    let hit = RULES.iter().any(|(rs, rd, rl, _)| *rs == s && *rd == d && *rl == l);
                    assert!(hit, "missing rule for {:?}/{:?}/{:?}", s, d, l);
                }
            }
        }
    }

    #[test]
    fn validation_is_idempotent() {
        for s in ALL_SEARCH {
            for d in ALL_DECODING {
                for l in ALL_LM {
                    let first = validate_decoding_compatibility(s, d, l).is_ok();
                    let second = validate_decoding_compatibility(s, d, l).is_ok();
                    assert_eq!(first, second);
                }
            }
        }
    }

    #[test]
    fn subword_prefix_requires_raw_binary_lm() {
        assert!(validate_decoding_compatibility(
            SearchType::Prefix,
            DecodingKind::Subword,
            LmKind::RawBinary
        )
        .is_ok());
        assert!(matches!(
            validate_decoding_compatibility(SearchType::Prefix, DecodingKind::Subword, LmKind::None),
            Err(DecodeError::UnsupportedConfiguration { .. })
        ));
        assert!(matches!(
            validate_decoding_compatibility(
                SearchType::Prefix,
                DecodingKind::Subword,
                LmKind::Packaged
            ),
            Err(DecodeError::UnsupportedConfiguration { .. })
        ));
    }

    #[test]
    fn subword_lexicon_rejects_raw_binary_lm() {
        assert!(validate_decoding_compatibility(
            SearchType::Lexicon,
            DecodingKind::Subword,
            LmKind::Packaged
        )
        .is_ok());
        assert!(validate_decoding_compatibility(
            SearchType::Lexicon,
            DecodingKind::Subword,
            LmKind::None
        )
        .is_ok());
        assert!(matches!(
            validate_decoding_compatibility(
                SearchType::Lexicon,
                DecodingKind::Subword,
                LmKind::RawBinary
            ),
            Err(DecodeError::UnsupportedConfiguration { .. })
        ));
    }

    #[test]
    fn char_lexicon_accepts_everything() {
        for l in ALL_LM {
            assert!(
                validate_decoding_compatibility(SearchType::Lexicon, DecodingKind::Char, l).is_ok()
            );
        }
    }

    #[test]
    fn char_prefix_requires_some_lm() {
        assert!(matches!(
            validate_decoding_compatibility(SearchType::Prefix, DecodingKind::Char, LmKind::None),
            Err(DecodeError::UnsupportedConfiguration { .. })
        ));
        assert!(
            validate_decoding_compatibility(SearchType::Prefix, DecodingKind::Char, LmKind::RawBinary)
                .is_ok()
        );
        assert!(
            validate_decoding_compatibility(SearchType::Prefix, DecodingKind::Char, LmKind::Packaged)
                .is_ok()
        );
    }
}
