use std::io::Read;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::DecodeError;
use crate::lm::LmKind;

/// Archive member holding the LM binary inside a packaged model.
pub const LM_BINARY_MEMBER: &str = "kenlm_model.bin";
/// Optional companion lexicon member.
pub const LEXICON_MEMBER: &str = "flashlight.lexicon";

/// Narrow interface over the archive-unpacking utility.
pub trait ArchiveExtractor: Send + Sync {
    /// Names of archive members whose path matches `predicate`.
    fn list_members(
        &self,
        archive: &Path,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, DecodeError>;

    /// Extract the named members into `out_dir`, preserving member paths.
    fn extract_members(
        &self,
        archive: &Path,
        members: &[String],
        out_dir: &Path,
    ) -> Result<(), DecodeError>;
}

/// Default extractor for tar archives, gzip-compressed or plain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarArchiveExtractor;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

impl TarArchiveExtractor {
    fn open(archive: &Path) -> Result<Box<dyn Read>, DecodeError> {
        let mut magic = [0u8; 2];
        {
            let mut peek = std::fs::File::open(archive)
                .map_err(|e| DecodeError::io("open model archive", e))?;
            peek.read_exact(&mut magic)
                .map_err(|e| DecodeError::io("read archive header", e))?;
        }
        let file =
            std::fs::File::open(archive).map_err(|e| DecodeError::io("open model archive", e))?;
        if magic == GZIP_MAGIC {
            Ok(Box::new(flate2::read::GzDecoder::new(file)))
        } else {
            Ok(Box::new(file))
        }
    }
}

impl ArchiveExtractor for TarArchiveExtractor {
    fn list_members(
        &self,
        archive: &Path,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>, DecodeError> {
        let mut tar = tar::Archive::new(Self::open(archive)?);
        let entries = tar
            .entries()
            .map_err(|e| DecodeError::io("read archive entries", e))?;
        let mut members = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DecodeError::io("read archive entry", e))?;
            let path = entry
                .path()
                .map_err(|e| DecodeError::io("read archive entry path", e))?;
            let name = path.to_string_lossy().into_owned();
            if predicate(&name) {
                members.push(name);
            }
        }
        Ok(members)
    }

    fn extract_members(
        &self,
        archive: &Path,
        members: &[String],
        out_dir: &Path,
    ) -> Result<(), DecodeError> {
        let mut tar = tar::Archive::new(Self::open(archive)?);
        let entries = tar
            .entries()
            .map_err(|e| DecodeError::io("read archive entries", e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| DecodeError::io("read archive entry", e))?;
            let name = entry
                .path()
                .map_err(|e| DecodeError::io("read archive entry path", e))?
                .to_string_lossy()
                .into_owned();
            if members.iter().any(|m| m == &name) {
                entry
                    .unpack_in(out_dir)
                    .map_err(|e| DecodeError::io("extract archive member", e))?;
            }
        }
        Ok(())
    }
}

/// Determine the packaging kind of the configured LM path.
///
/// A missing path fails outright; a path that does not parse as an archive,
/// or an archive without an LM binary member, falls back to being treated as
/// a raw binary. The fallback is logged so callers can tell which path was
/// taken.
pub fn probe_lm_kind(
    kenlm_path: Option<&Path>,
    extractor: &dyn ArchiveExtractor,
) -> Result<LmKind, DecodeError> {
    let path = match kenlm_path {
        Some(p) => p,
        None => return Ok(LmKind::None),
    };
    if !path.exists() {
        return Err(DecodeError::resource_not_found(
            path,
            "LM binary file not found; set a valid kenlm_path in the decoding config",
        ));
    }
    match extractor.list_members(path, &|name| name.contains(LM_BINARY_MEMBER)) {
        Ok(members) if !members.is_empty() => Ok(LmKind::Packaged),
        Ok(_) => {
            tracing::warn!(
                path = %path.display(),
                "archive has no `{LM_BINARY_MEMBER}` member; treating kenlm_path as a raw LM binary"
            );
            Ok(LmKind::RawBinary)
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "kenlm_path is not a packaged model archive; treating it as a raw LM binary"
            );
            Ok(LmKind::RawBinary)
        }
    }
}

/// Resolved on-disk LM resources for one decode invocation.
///
/// For packaged models this owns the temporary extraction directory; dropping
/// the resource deletes it. The owning decoder must let the resource go out
/// of scope before the decode call that created it returns.
#[derive(Debug)]
pub struct LanguageModelResource {
    kind: LmKind,
    binary_path: Option<PathBuf>,
    lexicon_path: Option<PathBuf>,
    temp_dir: Option<TempDir>,
}

impl LanguageModelResource {
    pub fn none() -> Self {
        Self {
            kind: LmKind::None,
            binary_path: None,
            lexicon_path: None,
            temp_dir: None,
        }
    }

    pub fn acquire(
        kenlm_path: Option<&Path>,
        kind: LmKind,
        extractor: &dyn ArchiveExtractor,
    ) -> Result<Self, DecodeError> {
        match kind {
            LmKind::None => Ok(Self::none()),
            LmKind::RawBinary => {
                let path = kenlm_path.ok_or_else(|| {
                    DecodeError::configuration("raw binary LM kind without a kenlm_path")
                })?;
                if !path.exists() {
                    return Err(DecodeError::resource_not_found(
                        path,
                        "LM binary file not found",
                    ));
                }
                Ok(Self {
                    kind,
                    binary_path: Some(path.to_path_buf()),
                    lexicon_path: None,
                    temp_dir: None,
                })
            }
            LmKind::Packaged => {
                let path = kenlm_path.ok_or_else(|| {
                    DecodeError::configuration("packaged LM kind without a kenlm_path")
                })?;
                Self::extract_packaged(path, extractor)
            }
        }
    }

    fn extract_packaged(
        archive: &Path,
        extractor: &dyn ArchiveExtractor,
    ) -> Result<Self, DecodeError> {
        let binaries = extractor.list_members(archive, &|name| name.contains(LM_BINARY_MEMBER))?;
        let binary_member = binaries.first().ok_or_else(|| {
            DecodeError::resource_not_found(
                archive,
                format!("packaged model has no `{LM_BINARY_MEMBER}` member"),
            )
        })?;
        let lexicons = extractor.list_members(archive, &|name| name.contains(LEXICON_MEMBER))?;

        let temp_dir = tempfile::tempdir().map_err(|e| DecodeError::io("create LM temp dir", e))?;
        let mut members = vec![binary_member.clone()];
        members.extend(lexicons.first().cloned());
        extractor.extract_members(archive, &members, temp_dir.path())?;

        let binary_path = temp_dir.path().join(binary_member);
        let lexicon_path = lexicons.first().map(|m| temp_dir.path().join(m));
        tracing::debug!(
            binary = %binary_path.display(),
            lexicon = ?lexicon_path,
            "extracted packaged LM"
        );
        Ok(Self {
            kind: LmKind::Packaged,
            binary_path: Some(binary_path),
            lexicon_path,
            temp_dir: Some(temp_dir),
        })
    }

    pub fn kind(&self) -> LmKind {
        self.kind
    }

    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    pub fn lexicon_path(&self) -> Option<&Path> {
        self.lexicon_path.as_deref()
    }

    /// Extraction directory, when one is owned.
    pub fn temp_dir_path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_archive(dir: &Path, with_lexicon: bool) -> PathBuf {
        let archive_path = dir.join("model.nemo");
        let file = std::fs::File::create(&archive_path).expect("create archive");
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        let body = b"binary-lm-bytes";
        header.set_size(body.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, LM_BINARY_MEMBER, &body[..])
            .expect("append binary");
        if with_lexicon {
            let mut header = tar::Header::new_gnu();
            let lex = b"hello h e l l o |\n";
            header.set_size(lex.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, LEXICON_MEMBER, &lex[..])
                .expect("append lexicon");
        }
        builder.finish().expect("finish archive");
        archive_path
    }

    #[test]
    fn probe_none_without_path() {
        let kind = probe_lm_kind(None, &TarArchiveExtractor).unwrap();
        assert_eq!(kind, LmKind::None);
    }

    #[test]
    fn probe_missing_path_is_resource_not_found() {
        let err =
            probe_lm_kind(Some(Path::new("/nonexistent/lm.bin")), &TarArchiveExtractor).unwrap_err();
        assert!(matches!(err, DecodeError::ResourceNotFound { .. }));
    }

    #[test]
    fn probe_detects_packaged_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), true);
        let kind = probe_lm_kind(Some(&archive), &TarArchiveExtractor).unwrap();
        assert_eq!(kind, LmKind::Packaged);
    }

    #[test]
    fn probe_falls_back_to_raw_binary() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("lm.bin");
        std::fs::write(&raw, b"not a tar archive, just bytes").unwrap();
        let kind = probe_lm_kind(Some(&raw), &TarArchiveExtractor).unwrap();
        assert_eq!(kind, LmKind::RawBinary);
    }

    #[test]
    fn acquire_packaged_extracts_binary_and_lexicon() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), true);
        let resource =
            LanguageModelResource::acquire(Some(&archive), LmKind::Packaged, &TarArchiveExtractor)
                .unwrap();
        assert_eq!(resource.kind(), LmKind::Packaged);
        let binary = resource.binary_path().expect("binary path");
        assert!(binary.exists());
        assert_eq!(std::fs::read(binary).unwrap(), b"binary-lm-bytes");
        let lexicon = resource.lexicon_path().expect("lexicon path");
        assert!(lexicon.exists());
    }

    #[test]
    fn acquire_packaged_without_lexicon() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), false);
        let resource =
            LanguageModelResource::acquire(Some(&archive), LmKind::Packaged, &TarArchiveExtractor)
                .unwrap();
        assert!(resource.binary_path().is_some());
        assert!(resource.lexicon_path().is_none());
    }

    #[test]
    fn drop_deletes_extraction_dir() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), true);
        let resource =
            LanguageModelResource::acquire(Some(&archive), LmKind::Packaged, &TarArchiveExtractor)
                .unwrap();
        let extracted = resource.temp_dir_path().expect("temp dir").to_path_buf();
        assert!(extracted.exists());
        drop(resource);
        assert!(!extracted.exists());
    }

    #[test]
    fn acquire_raw_binary_keeps_caller_path() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("lm.bin");
        std::fs::write(&raw, b"bytes").unwrap();
        let resource =
            LanguageModelResource::acquire(Some(&raw), LmKind::RawBinary, &TarArchiveExtractor)
                .unwrap();
        assert_eq!(resource.binary_path(), Some(raw.as_path()));
        assert!(resource.temp_dir_path().is_none());
    }
}
