//! Safe apply
//!
//! Whole-file writes that a concurrent reader never observes half-done: the
//! new content goes to a temporary file in the target's directory, which is
//! then renamed over the target.

use crate::error::{EngineError, EngineResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes patch content to disk and restores pre-patch snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchApplier;

impl PatchApplier {
    pub fn new() -> Self {
        Self
    }

    /// Replace the file at `path` with `content`.
    pub fn apply(&self, path: &Path, content: &str) -> EngineResult<()> {
        write_atomic(path, content).map_err(|source| EngineError::Apply {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Restore the file at `path` to its `original` snapshot.
    pub fn revert(&self, path: &Path, original: &str) -> EngineResult<()> {
        write_atomic(path, original).map_err(|source| EngineError::Revert {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn temp_path_for(path: &Path) -> std::io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let tmp_name = format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    );
    Ok(path.with_file_name(tmp_name))
}

/// Write content atomically by writing to a temp file first, then renaming.
///
/// The target's permissions are carried over when it already exists. The
/// parent directory must exist; it is not created.
///
/// # Platform Notes
/// - **Unix**: `rename()` over an existing file is atomic (POSIX).
/// - **Windows**: `rename()` replaces the destination but is not guaranteed
///   atomic by the filesystem.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = temp_path_for(path)?;
    let existing_permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let write_result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        if let Some(perms) = existing_permissions {
            fs::set_permissions(&tmp_path, perms)?;
        }
        Ok::<(), std::io::Error>(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
