/*!
Storage adapters for the durable payload.

This module defines the storage abstraction (port) and concrete implementations
(adapters). The writer, reader, and orchestrator only talk to [`StorageAdapter`],
so the payload can live on the local filesystem, in memory for tests, or in
whatever keyed store an embedding application provides.
*/

pub mod local;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{PersistError, Result};

/// Storage abstraction for the encrypted payload
///
/// Implementations are shared with the background worker, hence `Send + Sync`.
pub trait StorageAdapter: Send + Sync {
    /// Replace the payload at `path` with `data` atomically
    ///
    /// Readers must observe either the previous complete payload or the new
    /// one, never a mix. On failure the previous payload (or its absence) must
    /// be left in place.
    fn write_atomic(&self, data: &[u8], path: &str) -> Result<()>;

    /// Read the payload at `path`
    ///
    /// # Returns
    /// `Ok(None)` if nothing is stored at `path`
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Check if a payload exists at `path`
    fn exists(&self, path: &str) -> bool;

    /// Delete the payload at `path`; deleting a missing payload succeeds
    fn delete(&self, path: &str) -> Result<()>;
}

pub use local::LocalFileStorage;

/// Memory-based storage adapter
///
/// Stores payloads in a shared map. Clones see the same contents, which lets
/// a test keep a handle while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| PersistError::storage("memory storage lock poisoned"))
    }
}

impl StorageAdapter for MemoryStorage {
    fn write_atomic(&self, data: &[u8], path: &str) -> Result<()> {
        self.entries()?.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(path).cloned())
    }

    fn exists(&self, path: &str) -> bool {
        self.entries()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.entries()?.remove(path);
        Ok(())
    }
}
