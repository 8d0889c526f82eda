/*!
Durable reader: read, decrypt, validate, and decode a stored payload.

Loading never fails from the caller's point of view. Every failure path
degrades to "no records"; payloads whose content cannot be trusted are removed
so they are not retried on every start.
*/

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::cipher::PayloadCipher;
use crate::container;
use crate::record::Record;
use crate::storage::StorageAdapter;
use crate::PersistError;

/// What a load attempt found
#[derive(Debug)]
pub enum LoadOutcome {
    /// No payload is stored (first run)
    Missing,
    /// No usable cipher; the payload was not read
    CipherUnavailable,
    /// The payload decoded cleanly
    Loaded(Vec<Record>),
    /// The payload failed decryption or decoding and was scheduled for removal
    Unreadable(PersistError),
    /// Storage could not be read; the payload was left in place
    ReadFailed(PersistError),
}

impl LoadOutcome {
    /// Collapse the outcome into the records it carries, if any
    pub fn into_records(self) -> Vec<Record> {
        match self {
            LoadOutcome::Loaded(records) => records,
            _ => Vec::new(),
        }
    }
}

/// Reads the payload at one storage location
pub struct DurableReader<S, C>
where
    S: StorageAdapter,
    C: PayloadCipher,
{
    storage: Arc<S>,
    cipher: Arc<C>,
    path: String,
    magic_token: Vec<u8>,
}

impl<S, C> DurableReader<S, C>
where
    S: StorageAdapter,
    C: PayloadCipher,
{
    pub fn new(
        storage: Arc<S>,
        cipher: Arc<C>,
        path: impl Into<String>,
        magic_token: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            storage,
            cipher,
            path: path.into(),
            magic_token: magic_token.into(),
        }
    }

    /// Load all records, or none
    pub fn load(&self) -> Vec<Record> {
        self.load_outcome().into_records()
    }

    /// Load the payload and report how it went
    pub fn load_outcome(&self) -> LoadOutcome {
        if !self.cipher.is_available() {
            // Nothing can be decrypted; leave the payload for a later run
            debug!(path = %self.path, "Cipher unavailable, skipping restore");
            return LoadOutcome::CipherUnavailable;
        }

        let sealed = match self.storage.read(&self.path) {
            Ok(Some(sealed)) => sealed,
            Ok(None) => {
                debug!(path = %self.path, "No payload to restore");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "Failed to read payload");
                return LoadOutcome::ReadFailed(e);
            }
        };

        let decoded = self
            .cipher
            .decrypt(&sealed)
            .and_then(|plaintext| container::decode(&self.magic_token, &plaintext));

        match decoded {
            Ok(records) => {
                debug!(path = %self.path, records = records.len(), "Payload restored");
                LoadOutcome::Loaded(records)
            }
            Err(PersistError::CipherUnavailable) => {
                debug!(path = %self.path, "Cipher became unavailable, skipping restore");
                LoadOutcome::CipherUnavailable
            }
            Err(e) => {
                warn!(path = %self.path, error = %e, "Discarding unreadable payload");
                self.discard();
                LoadOutcome::Unreadable(e)
            }
        }
    }

    fn discard(&self) {
        if let Err(e) = self.storage.delete(&self.path) {
            error!(path = %self.path, error = %e, "Failed to delete unreadable payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{AesGcmCipher, UnavailableCipher};
    use crate::container::DEFAULT_MAGIC_TOKEN;
    use crate::storage::MemoryStorage;

    const PATH: &str = "COOKIES.DAT";

    fn records() -> Vec<Record> {
        vec![
            Record::new("id", "1", "a.com", "/").with_times(100, 200, 150),
            Record::new("s", "x", "b.com", "/").with_times(300, -1, 300),
        ]
    }

    fn seal(cipher: &AesGcmCipher, magic: &[u8], records: &[Record]) -> Vec<u8> {
        let plaintext = container::encode(magic, records).unwrap();
        cipher.encrypt(&plaintext).unwrap()
    }

    fn reader(
        storage: &Arc<MemoryStorage>,
        cipher: AesGcmCipher,
    ) -> DurableReader<MemoryStorage, AesGcmCipher> {
        DurableReader::new(Arc::clone(storage), Arc::new(cipher), PATH, DEFAULT_MAGIC_TOKEN)
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let outcome = reader(&storage, AesGcmCipher::new([1; 32])).load_outcome();
        assert!(matches!(outcome, LoadOutcome::Missing));
    }

    #[test]
    fn test_loads_sealed_payload() {
        let storage = Arc::new(MemoryStorage::new());
        let cipher = AesGcmCipher::new([1; 32]);
        storage
            .write_atomic(&seal(&cipher, &DEFAULT_MAGIC_TOKEN, &records()), PATH)
            .unwrap();

        let loaded = reader(&storage, cipher).load();
        assert_eq!(loaded, records());
        // Loading does not consume the payload by itself
        assert!(storage.exists(PATH));
    }

    #[test]
    fn test_unavailable_cipher_does_not_read_or_delete() {
        let storage = Arc::new(MemoryStorage::new());
        storage.write_atomic(b"sealed bytes", PATH).unwrap();

        let reader = DurableReader::new(
            Arc::clone(&storage),
            Arc::new(UnavailableCipher::new()),
            PATH,
            DEFAULT_MAGIC_TOKEN,
        );
        assert!(matches!(
            reader.load_outcome(),
            LoadOutcome::CipherUnavailable
        ));
        assert!(storage.exists(PATH));
    }

    #[test]
    fn test_wrong_key_discards_payload() {
        let storage = Arc::new(MemoryStorage::new());
        let sealed = seal(&AesGcmCipher::new([1; 32]), &DEFAULT_MAGIC_TOKEN, &records());
        storage.write_atomic(&sealed, PATH).unwrap();

        let outcome = reader(&storage, AesGcmCipher::new([2; 32])).load_outcome();
        assert!(matches!(
            outcome,
            LoadOutcome::Unreadable(PersistError::Cipher(_))
        ));
        assert!(!storage.exists(PATH));
    }

    #[test]
    fn test_magic_mismatch_discards_payload() {
        let storage = Arc::new(MemoryStorage::new());
        let cipher = AesGcmCipher::new([1; 32]);
        storage
            .write_atomic(&seal(&cipher, b"stale-v0", &records()), PATH)
            .unwrap();

        let outcome = reader(&storage, cipher).load_outcome();
        assert!(matches!(
            outcome,
            LoadOutcome::Unreadable(PersistError::FormatMismatch)
        ));
        assert!(!storage.exists(PATH));
    }

    #[test]
    fn test_truncated_container_discards_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let cipher = AesGcmCipher::new([1; 32]);
        let mut plaintext = container::encode(&DEFAULT_MAGIC_TOKEN, &records()).unwrap();
        plaintext.truncate(plaintext.len() - 3);
        storage
            .write_atomic(&cipher.encrypt(&plaintext).unwrap(), PATH)
            .unwrap();

        assert!(reader(&storage, cipher).load().is_empty());
        assert!(!storage.exists(PATH));
    }
}
