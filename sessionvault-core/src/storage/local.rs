/*!
Local filesystem storage adapter implementation.
*/

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::StorageAdapter;
use crate::{PersistError, Result};

/// Local filesystem storage adapter
///
/// Payloads are committed with write-to-temporary-then-rename: the new bytes go
/// to a temporary file in the destination directory, are flushed to disk, and
/// the temporary file is renamed over the canonical path. A crash at any point
/// leaves either the old file or the new file at the canonical path. The
/// temporary file is removed on every failure path.
///
/// # Example
/// ```rust
/// use sessionvault_core::storage::{LocalFileStorage, StorageAdapter};
///
/// # let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::with_base_dir(dir.path());
/// storage.write_atomic(b"encrypted payload", "COOKIES.DAT")?;
/// assert!(storage.exists("COOKIES.DAT"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    /// Optional base directory for all payloads
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Create a new local file storage adapter without a base directory
    ///
    /// Paths provided to the adapter will be used as-is.
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Create a new local file storage adapter with a base directory
    ///
    /// All paths will be resolved relative to the base directory.
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    /// Resolve the full path for a given storage path
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self, path: &Path) -> Result<PathBuf> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent).map_err(|e| {
                PersistError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(parent)
    }

    /// Atomic commit with a hook that runs after the temporary file is durable
    /// and before it replaces the canonical path.
    pub(crate) fn write_atomic_with<F>(&self, data: &[u8], path: &str, before_rename: F) -> Result<()>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let full_path = self.resolve_path(path);
        let parent = self.ensure_parent_dir(&full_path)?;

        let file_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload".to_string());

        // Dropping the handle on any early return removes the temporary file
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| {
                PersistError::storage(format!(
                    "Failed to create temporary file in {}: {}",
                    parent.display(),
                    e
                ))
            })?;

        write_and_sync(&mut tmp, data).map_err(|e| {
            PersistError::storage(format!(
                "Failed to write temporary file {}: {}",
                tmp.path().display(),
                e
            ))
        })?;

        before_rename(tmp.path())
            .map_err(|e| PersistError::storage(format!("Commit aborted before rename: {e}")))?;

        tmp.persist(&full_path).map_err(|e| {
            PersistError::storage(format!(
                "Failed to move payload into {}: {}",
                full_path.display(),
                e.error
            ))
        })?;

        sync_dir(&parent);
        debug!(path = %full_path.display(), bytes = data.len(), "Committed payload");
        Ok(())
    }
}

impl Default for LocalFileStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn write_and_sync(tmp: &mut NamedTempFile, data: &[u8]) -> io::Result<()> {
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()
}

/// Flush the directory entry so the rename itself survives a crash
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync payload directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

impl StorageAdapter for LocalFileStorage {
    fn write_atomic(&self, data: &[u8], path: &str) -> Result<()> {
        self.write_atomic_with(data, path, |_| Ok(()))
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full_path = self.resolve_path(path);

        match fs::read(&full_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistError::storage(format!(
                "Failed to read payload from {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::storage(format!(
                "Failed to delete payload {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}
