//! Storage writer seam — delivering the finished file
//!
//! The final hand-off moves the merged file out of the temp directory into a
//! public location under a deterministic name. Temp file deletion in the
//! orchestrator is gated on this hand-off reporting success.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// External storage collaborator the finished file is handed to
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Deliver `source` under the public name `name`.
    ///
    /// Returns the final path of the delivered file. Implementations must
    /// only return `Ok` once the file is durably in place; the caller
    /// deletes its temp files on success.
    async fn publish(&self, source: &Path, name: &str) -> Result<PathBuf>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Storage writer that moves files into a local public directory
///
/// Collisions are resolved by suffixing `(1)`, `(2)`, ... before the
/// extension. A rename across filesystems falls back to copy + remove.
pub struct LocalStorageWriter {
    public_dir: PathBuf,
}

impl LocalStorageWriter {
    /// Create a writer delivering into `public_dir` (created on demand).
    pub fn new(public_dir: PathBuf) -> Self {
        Self { public_dir }
    }
}

#[async_trait]
impl StorageWriter for LocalStorageWriter {
    async fn publish(&self, source: &Path, name: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.public_dir)
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "failed to create public directory '{}': {e}",
                    self.public_dir.display()
                ))
            })?;

        let destination = unique_path(&self.public_dir.join(name))?;

        match tokio::fs::rename(source, &destination).await {
            Ok(()) => {}
            Err(rename_err) => {
                // Cross-device rename is not supported; fall back to copy + remove
                tracing::debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %rename_err,
                    "rename failed, falling back to copy"
                );
                tokio::fs::copy(source, &destination).await.map_err(|e| {
                    Error::Storage(format!(
                        "failed to deliver '{}' to '{}': {e}",
                        source.display(),
                        destination.display()
                    ))
                })?;
                if let Err(e) = tokio::fs::remove_file(source).await {
                    tracing::warn!(source = %source.display(), error = %e, "failed to remove source after copy");
                }
            }
        }

        tracing::info!(path = %destination.display(), "file delivered");
        Ok(destination)
    }

    fn name(&self) -> &'static str {
        "local-move"
    }
}

/// Find a collision-free variant of `path` by suffixing `(1)`, `(2)`, ...
fn unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Storage(format!("cannot extract file stem from '{}'", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("cannot extract parent of '{}'", path.display())))?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let candidate_name = match extension {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Storage(format!(
        "could not find a unique name for '{}' after {MAX_RENAME_ATTEMPTS} attempts",
        path.display()
    )))
}
