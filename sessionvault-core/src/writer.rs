/*!
Durable writer: encrypt a complete container and commit it atomically.
*/

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cipher::PayloadCipher;
use crate::storage::StorageAdapter;
use crate::{PersistError, Result};

/// Encrypts plaintext containers and commits them to one storage location
///
/// The writer never falls back to plaintext: without a usable cipher the
/// commit is abandoned before storage is touched.
pub struct DurableWriter<S, C>
where
    S: StorageAdapter,
    C: PayloadCipher,
{
    storage: Arc<S>,
    cipher: Arc<C>,
    path: String,
}

impl<S, C> DurableWriter<S, C>
where
    S: StorageAdapter,
    C: PayloadCipher,
{
    pub fn new(storage: Arc<S>, cipher: Arc<C>, path: impl Into<String>) -> Self {
        Self {
            storage,
            cipher,
            path: path.into(),
        }
    }

    /// Storage location this writer commits to
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encrypt `plaintext` in one pass and atomically replace the payload
    ///
    /// # Returns
    /// Size of the committed encrypted payload in bytes
    ///
    /// # Errors
    /// * `PersistError::CipherUnavailable` - no usable cipher; nothing was written
    /// * `PersistError::Cipher` - encryption failed; nothing was written
    /// * `PersistError::Storage` - the atomic commit failed; the previous payload is intact
    pub fn commit(&self, plaintext: &[u8]) -> Result<usize> {
        if !self.cipher.is_available() {
            debug!(path = %self.path, "Cipher unavailable, skipping commit");
            return Err(PersistError::CipherUnavailable);
        }

        let sealed = self.cipher.encrypt(plaintext).map_err(|e| {
            warn!(path = %self.path, error = %e, "Payload encryption failed");
            e
        })?;

        self.storage.write_atomic(&sealed, &self.path)?;
        debug!(
            path = %self.path,
            plaintext_bytes = plaintext.len(),
            payload_bytes = sealed.len(),
            algorithm = self.cipher.algorithm_name(),
            "Payload committed"
        );
        Ok(sealed.len())
    }
}

impl<S, C> Clone for DurableWriter<S, C>
where
    S: StorageAdapter,
    C: PayloadCipher,
{
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            cipher: Arc::clone(&self.cipher),
            path: self.path.clone(),
        }
    }
}
