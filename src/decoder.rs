use std::sync::Arc;

use candle_core::{DType, Device, Tensor};

use crate::compat::{validate_decoding_compatibility, DecodingKind};
use crate::config::{BeamDecodingConfig, SearchType};
use crate::error::DecodeError;
use crate::lm::resource::{ArchiveExtractor, LanguageModelResource, TarArchiveExtractor};
use crate::lm::{LanguageModel, LanguageModelFactory, LmKind, ZeroLanguageModel};
use crate::pack::HypothesisAssembler;
use crate::search::lexicon::LexiconBeamSearch;
use crate::search::prefix::PrefixBeamSearch;
use crate::search::SearchBackend;
use crate::types::{BatchHypotheses, NBestHypotheses};
use crate::vocabulary::Vocabulary;

/// Text/token-id codec for subword vocabularies.
///
/// The tokenizer is an external collaborator (typically a trained
/// sentencepiece model); subword decoding cannot run without one.
pub trait Tokenizer: Send + Sync {
    fn text_to_ids(&self, text: &str) -> Vec<usize>;
    fn ids_to_text(&self, ids: &[usize]) -> String;
}

/// Batch CTC beam-search decoder.
///
/// Construction validates the configuration and probes the packaging kind of
/// any configured language model. The search backend itself is built lazily
/// on the first [`decode`](Self::decode) call, after the vocabulary and
/// decoding type have been supplied; packaged LM archives are extracted into
/// a temporary directory that is deleted again before that call returns.
///
/// Not thread-safe: the lazy backend build and the backend's beam state
/// require exclusive access, hence `decode(&mut self)`.
pub struct BeamCtcDecoder {
    cfg: BeamDecodingConfig,
    vocabulary: Option<Vocabulary>,
    decoding: Option<DecodingKind>,
    tokenizer: Option<Box<dyn Tokenizer>>,
    lm_factory: Option<Box<dyn LanguageModelFactory>>,
    extractor: Box<dyn ArchiveExtractor>,
    lm_kind: LmKind,
    backend: Option<Box<dyn SearchBackend>>,
}

impl BeamCtcDecoder {
    pub fn new(cfg: BeamDecodingConfig) -> Result<Self, DecodeError> {
        Self::with_archive_extractor(cfg, Box::new(TarArchiveExtractor))
    }

    /// Build a decoder that unpacks packaged LM archives through `extractor`.
    pub fn with_archive_extractor(
        cfg: BeamDecodingConfig,
        extractor: Box<dyn ArchiveExtractor>,
    ) -> Result<Self, DecodeError> {
        cfg.validate()?;
        let lm_kind = crate::lm::resource::probe_lm_kind(cfg.kenlm_path.as_deref(), &*extractor)?;
        tracing::debug!(
            search = cfg.search_type.as_str(),
            lm = lm_kind.as_str(),
            beam_size = cfg.beam_size,
            "configured beam decoder"
        );
        Ok(Self {
            cfg,
            vocabulary: None,
            decoding: None,
            tokenizer: None,
            lm_factory: None,
            extractor,
            lm_kind,
            backend: None,
        })
    }

    pub fn config(&self) -> &BeamDecodingConfig {
        &self.cfg
    }

    pub fn lm_kind(&self) -> LmKind {
        self.lm_kind
    }

    pub fn set_vocabulary(&mut self, vocabulary: Vocabulary) {
        self.vocabulary = Some(vocabulary);
        self.backend = None;
    }

    /// Select char or subword decoding. Fails when the combination of search
    /// backend, decoding kind and LM packaging is unsupported.
    pub fn set_decoding_type(&mut self, decoding: DecodingKind) -> Result<(), DecodeError> {
        validate_decoding_compatibility(self.cfg.search_type, decoding, self.lm_kind)?;
        self.decoding = Some(decoding);
        self.backend = None;
        Ok(())
    }

    pub fn set_tokenizer(&mut self, tokenizer: Box<dyn Tokenizer>) {
        self.tokenizer = Some(tokenizer);
        self.backend = None;
    }

    pub fn set_language_model_factory(&mut self, factory: Box<dyn LanguageModelFactory>) {
        self.lm_factory = Some(factory);
        self.backend = None;
    }

    /// Decode a `[B, T, V+1]` batch of log-probabilities.
    ///
    /// `lengths` is a rank-1 integer tensor of per-sample valid frame counts,
    /// index-aligned with the batch. Rows past a sample's length are ignored.
    pub fn decode(
        &mut self,
        log_probs: &Tensor,
        lengths: &Tensor,
    ) -> Result<BatchHypotheses, DecodeError> {
        let decoding = self.decoding.ok_or_else(|| {
            DecodeError::not_ready("decoding type not set; call set_decoding_type first")
        })?;
        let vocab_len = self
            .vocabulary
            .as_ref()
            .ok_or_else(|| {
                DecodeError::not_ready("vocabulary not set; call set_vocabulary first")
            })?
            .len();
        if decoding == DecodingKind::Subword && self.tokenizer.is_none() {
            return Err(DecodeError::not_ready(
                "subword decoding requires a tokenizer; call set_tokenizer first",
            ));
        }
        validate_decoding_compatibility(self.cfg.search_type, decoding, self.lm_kind)?;

        let (batch, frames, classes) = log_probs
            .dims3()
            .map_err(|e| DecodeError::runtime("read log-prob shape", e))?;
        if classes != vocab_len + 1 {
            return Err(DecodeError::configuration(format!(
                "log-probs have {classes} classes, expected {} (vocabulary + blank)",
                vocab_len + 1
            )));
        }
        let lens = lengths
            .to_device(&Device::Cpu)
            .and_then(|t| t.to_dtype(DType::U32))
            .and_then(|t| t.to_vec1::<u32>())
            .map_err(|e| DecodeError::runtime("read sequence lengths", e))?;
        if lens.len() != batch {
            return Err(DecodeError::configuration(format!(
                "got {} lengths for a batch of {batch}",
                lens.len()
            )));
        }
        let lens: Vec<usize> = lens.into_iter().map(|l| l as usize).collect();
        if let Some(bad) = lens.iter().find(|&&l| l > frames) {
            return Err(DecodeError::configuration(format!(
                "sample length {bad} exceeds the {frames} available frames"
            )));
        }

        let host = log_probs
            .to_device(&Device::Cpu)
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(|e| DecodeError::runtime("move log-probs to host", e))?;
        let samples = host
            .to_vec3::<f32>()
            .map_err(|e| DecodeError::runtime("read log-prob values", e))?;

        tracing::debug!(batch, frames, classes, "beam decoding batch");

        // The resource guard owns any temporary LM extraction directory; it
        // must not outlive this call.
        let resource_guard = self.ensure_backend(decoding)?;
        let candidates = {
            let backend = self
                .backend
                .as_mut()
                .ok_or_else(|| DecodeError::runtime("decode", "search backend unavailable"))?;
            backend.search(&samples, &lens)?
        };
        drop(resource_guard);

        let vocabulary = self
            .vocabulary
            .as_ref()
            .ok_or_else(|| DecodeError::not_ready("vocabulary not set"))?;
        let assembler = HypothesisAssembler::new(
            decoding,
            vocabulary,
            self.tokenizer.as_deref(),
            self.cfg.preserve_alignments,
        );
        let nbest = assembler.assemble_batch(candidates, &lens, &host)?;

        if self.cfg.return_best_hypothesis {
            let best = nbest
                .into_iter()
                .map(|NBestHypotheses(mut list)| {
                    if list.is_empty() {
                        Err(DecodeError::runtime(
                            "decode",
                            "backend produced an empty candidate list",
                        ))
                    } else {
                        Ok(list.swap_remove(0))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(BatchHypotheses::Best(best))
        } else {
            Ok(BatchHypotheses::NBest(nbest))
        }
    }

    /// Build the search backend on first use, returning the LM resource guard
    /// when one was acquired.
    fn ensure_backend(
        &mut self,
        decoding: DecodingKind,
    ) -> Result<Option<LanguageModelResource>, DecodeError> {
        if self.backend.is_some() {
            return Ok(None);
        }
        let resource = LanguageModelResource::acquire(
            self.cfg.kenlm_path.as_deref(),
            self.lm_kind,
            &*self.extractor,
        )?;
        let lm = self.language_model(&resource)?;
        let backend = self.build_backend(decoding, &resource, lm)?;
        tracing::info!(
            search = self.cfg.search_type.as_str(),
            lm = self.lm_kind.as_str(),
            "built beam search backend"
        );
        self.backend = Some(backend);
        Ok(Some(resource))
    }

    fn language_model(
        &self,
        resource: &LanguageModelResource,
    ) -> Result<Arc<dyn LanguageModel>, DecodeError> {
        if self.lm_kind == LmKind::None {
            return Ok(Arc::new(ZeroLanguageModel));
        }
        let factory = self.lm_factory.as_ref().ok_or_else(|| {
            DecodeError::dependency_missing(
                "kenlm_path is set but no language model factory was provided; \
                 call set_language_model_factory",
            )
        })?;
        let binary = resource.binary_path().ok_or_else(|| {
            DecodeError::configuration("language model resource has no binary path")
        })?;
        let lm = factory.load(binary, resource.lexicon_path())?;
        Ok(Arc::from(lm))
    }

    fn build_backend(
        &self,
        decoding: DecodingKind,
        resource: &LanguageModelResource,
        lm: Arc<dyn LanguageModel>,
    ) -> Result<Box<dyn SearchBackend>, DecodeError> {
        let vocabulary = self
            .vocabulary
            .as_ref()
            .ok_or_else(|| DecodeError::not_ready("vocabulary not set"))?;
        let tokens = vocabulary.tokens().to_vec();
        let subword = decoding == DecodingKind::Subword;
        match self.cfg.search_type {
            SearchType::Prefix => {
                let backend = PrefixBeamSearch::new(
                    tokens,
                    self.cfg.blank_id,
                    self.cfg.beam_size,
                    self.cfg.beam_alpha,
                    self.cfg.beam_beta,
                    subword,
                    self.cfg.prefix.clone(),
                    lm,
                    self.cfg.compute_timestamps,
                )?;
                Ok(Box::new(backend))
            }
            SearchType::Lexicon => {
                // A lexicon shipped inside a packaged model wins over the
                // configured path.
                let lexicon_path = resource
                    .lexicon_path()
                    .or(self.cfg.lexicon.lexicon_path.as_deref());
                let remap_to_chars = subword && self.lm_kind == LmKind::Packaged;
                let backend = LexiconBeamSearch::new(
                    tokens,
                    self.cfg.blank_id,
                    self.cfg.beam_size,
                    self.cfg.beam_alpha,
                    self.cfg.beam_beta,
                    subword,
                    remap_to_chars,
                    self.cfg.lexicon.clone(),
                    lexicon_path,
                    lm,
                    self.cfg.compute_timestamps,
                )?;
                Ok(Box::new(backend))
            }
        }
    }
}
