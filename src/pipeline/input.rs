//! Input resolution: turn a path or an in-memory PDF into a file pdfium can open.
//!
//! pdfium wants a file-system path. In-memory input is spilled to a
//! `TempDir` that lives as long as the returned [`ResolvedInput`]. Both routes
//! check the `%PDF` magic bytes first so a wrong file is reported as such
//! rather than as a pdfium load failure.

use crate::error::AudiobookError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF on disk, ready for pdfium.
#[derive(Debug)]
pub enum ResolvedInput {
    /// The caller's own file.
    Local(PathBuf),
    /// Bytes written to a temp directory, removed on drop.
    Spilled { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Spilled { path, .. } => path,
        }
    }
}

/// Validate a local PDF path: exists, readable, starts with `%PDF`.
pub fn resolve_local(path: impl AsRef<Path>) -> Result<ResolvedInput, AudiobookError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(AudiobookError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
                return Err(AudiobookError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(AudiobookError::PermissionDenied { path });
        }
        Err(_) => return Err(AudiobookError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write in-memory PDF bytes to a temp file.
pub fn spill_bytes(bytes: &[u8]) -> Result<ResolvedInput, AudiobookError> {
    let path_hint = PathBuf::from("<memory>");
    if bytes.len() < 4 || &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(AudiobookError::NotAPdf {
            path: path_hint,
            magic,
        });
    }

    let temp_dir = TempDir::new().map_err(|source| AudiobookError::OutputWriteFailed {
        path: std::env::temp_dir(),
        source,
    })?;
    let path = temp_dir.path().join("input.pdf");
    std::fs::write(&path, bytes).map_err(|source| AudiobookError::OutputWriteFailed {
        path: path.clone(),
        source,
    })?;

    debug!("Spilled {} PDF bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput::Spilled {
        path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, AudiobookError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"PK\x03\x04 zip, not pdf").unwrap();
        match resolve_local(f.path()).unwrap_err() {
            AudiobookError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn valid_magic() {
        let mut f = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"%PDF-1.7\n").unwrap();
        let resolved = resolve_local(f.path()).unwrap();
        assert_eq!(resolved.path(), f.path());
    }

    #[test]
    fn spilled_bytes_live_until_drop() {
        let resolved = spill_bytes(b"%PDF-1.4\n%%EOF").unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        drop(resolved);
        assert!(!path.exists());

        assert!(matches!(
            spill_bytes(b"%P").unwrap_err(),
            AudiobookError::NotAPdf { .. }
        ));
    }
}
