/*!
Cipher adapters for payload encryption.

The pipeline only depends on [`PayloadCipher`]; which algorithm and which key
are in use is the embedding application's business. [`AesGcmCipher`] is the
stock implementation, [`UnavailableCipher`] stands in when no key exists.
*/

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{PersistError, Result};

/// Encryption capability used by the durable writer and reader
///
/// Implementations must encrypt a whole payload in one call; the pipeline
/// never streams partial plaintext through a cipher.
pub trait PayloadCipher: Send + Sync {
    /// Whether the cipher can currently be used.
    ///
    /// When this is false, [`encrypt`](Self::encrypt) and
    /// [`decrypt`](Self::decrypt) fail with [`PersistError::CipherUnavailable`].
    ///
    /// Called from the background worker right before each commit or load,
    /// so it must be safe to call from any thread and must not have side
    /// effects.
    fn is_available(&self) -> bool;

    /// Encrypt a complete plaintext payload
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a complete ciphertext payload
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of the cipher algorithm
    fn algorithm_name(&self) -> &str;
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM payload cipher
///
/// Every call to `encrypt` draws a fresh random nonce and emits
/// `nonce || ciphertext || tag`. A wrong key surfaces as a tag failure on
/// decrypt, reported as [`PersistError::Cipher`].
///
/// # Example
/// ```rust
/// use sessionvault_core::{AesGcmCipher, PayloadCipher};
///
/// let cipher = AesGcmCipher::new([7u8; 32]);
/// let sealed = cipher.encrypt(b"cookie jar")?;
/// assert_eq!(cipher.decrypt(&sealed)?, b"cookie jar");
/// # Ok::<(), sessionvault_core::PersistError>(())
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesGcmCipher {
    key: [u8; 32],
}

impl AesGcmCipher {
    /// Create a cipher from a 256-bit key
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Create a cipher from a key slice, rejecting anything but 32 bytes
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; 32] = key.try_into().map_err(|_| {
            PersistError::validation(format!("AES-256 key must be 32 bytes, got {}", key.len()))
        })?;
        Ok(Self::new(key))
    }

    /// Create a cipher with a freshly generated random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    fn aead(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| PersistError::cipher(format!("Invalid AES-256-GCM key: {e}")))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher for AesGcmCipher {
    fn is_available(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .aead()?
            .encrypt((&nonce).into(), plaintext)
            .map_err(|_| PersistError::cipher("AES-256-GCM encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(PersistError::cipher(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| PersistError::cipher("malformed nonce"))?;
        self.aead()?
            .decrypt((&nonce).into(), sealed)
            .map_err(|_| PersistError::cipher("AES-256-GCM authentication failed"))
    }

    fn algorithm_name(&self) -> &str {
        "aes-256-gcm"
    }
}

/// Cipher placeholder for platforms without a usable key
///
/// Reports itself unavailable, so the writer skips persisting and the reader
/// skips restoring rather than touching plaintext.
#[derive(Debug, Clone, Default)]
pub struct UnavailableCipher;

impl UnavailableCipher {
    pub fn new() -> Self {
        Self
    }
}

impl PayloadCipher for UnavailableCipher {
    fn is_available(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(PersistError::CipherUnavailable)
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>> {
        Err(PersistError::CipherUnavailable)
    }

    fn algorithm_name(&self) -> &str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let cipher = AesGcmCipher::new([1u8; 32]);
        let plaintext = b"c0Ok135 and some records".to_vec();

        let sealed = cipher.encrypt(&plaintext).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
        assert_ne!(&sealed[NONCE_LEN..NONCE_LEN + plaintext.len()], &plaintext[..]);

        assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_aes_gcm_fresh_nonce_per_call() {
        let cipher = AesGcmCipher::new([1u8; 32]);
        let first = cipher.encrypt(b"same").unwrap();
        let second = cipher.encrypt(b"same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_aes_gcm_wrong_key() {
        let sealed = AesGcmCipher::new([1u8; 32]).encrypt(b"secret").unwrap();
        let result = AesGcmCipher::new([2u8; 32]).decrypt(&sealed);
        assert!(matches!(result, Err(PersistError::Cipher(_))));
    }

    #[test]
    fn test_aes_gcm_short_ciphertext() {
        let cipher = AesGcmCipher::generate();
        assert!(matches!(
            cipher.decrypt(b"short"),
            Err(PersistError::Cipher(_))
        ));
    }

    #[test]
    fn test_from_slice_length_check() {
        assert!(AesGcmCipher::from_slice(&[0u8; 32]).is_ok());
        assert!(matches!(
            AesGcmCipher::from_slice(&[0u8; 16]),
            Err(PersistError::Validation(_))
        ));
    }

    #[test]
    fn test_unavailable_cipher() {
        let cipher = UnavailableCipher::new();
        assert!(!cipher.is_available());
        assert!(matches!(
            cipher.encrypt(b"data"),
            Err(PersistError::CipherUnavailable)
        ));
        assert!(matches!(
            cipher.decrypt(b"data"),
            Err(PersistError::CipherUnavailable)
        ));
        assert_eq!(cipher.algorithm_name(), "unavailable");
    }

    #[test]
    fn test_availability_checked_from_worker_thread() {
        let ciphers: Vec<std::sync::Arc<dyn PayloadCipher>> = vec![
            std::sync::Arc::new(AesGcmCipher::new([1u8; 32])),
            std::sync::Arc::new(UnavailableCipher::new()),
        ];
        let seen: Vec<bool> = ciphers
            .iter()
            .map(|cipher| {
                let cipher = std::sync::Arc::clone(cipher);
                std::thread::spawn(move || (cipher.is_available(), cipher.is_available()))
                    .join()
                    .unwrap()
            })
            .map(|(first, second)| {
                assert_eq!(first, second);
                first
            })
            .collect();
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn test_debug_hides_key() {
        let cipher = AesGcmCipher::new([0xAB; 32]);
        assert_eq!(format!("{cipher:?}"), "AesGcmCipher { .. }");
    }
}
