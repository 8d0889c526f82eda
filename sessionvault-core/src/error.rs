/*!
Error types for the session vault pipeline.
*/

use thiserror::Error;

/// Result type used throughout the session vault core.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors that can occur while encoding, encrypting, storing, or restoring records.
#[derive(Error, Debug)]
pub enum PersistError {
    /// The container did not start with the configured magic token
    #[error("Format mismatch: payload does not start with the expected magic token")]
    FormatMismatch,

    /// Fewer bytes remained than a record field requires
    #[error("Truncated record: stream ended while reading field '{field}'")]
    TruncatedRecord { field: &'static str },

    /// No further records exist at the current position (decode loop terminator)
    #[error("End of record stream")]
    EndOfStream,

    /// A record was fully present but its content is malformed
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// No usable cipher is configured
    #[error("Cipher unavailable")]
    CipherUnavailable,

    /// Encryption or decryption failed
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The background worker could not accept or finish a job
    #[error("Worker error: {0}")]
    Worker(String),
}

impl PersistError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new cipher error
    pub fn cipher<S: Into<String>>(msg: S) -> Self {
        Self::Cipher(msg.into())
    }

    /// Create a new invalid record error
    pub fn invalid_record<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a new worker error
    pub fn worker<S: Into<String>>(msg: S) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether this error means the payload content itself cannot be trusted.
    ///
    /// These are the failures after which a stored payload is considered
    /// unreadable and gets removed instead of being retried on the next run.
    pub fn is_unreadable_payload(&self) -> bool {
        matches!(
            self,
            Self::FormatMismatch
                | Self::TruncatedRecord { .. }
                | Self::InvalidRecord(_)
                | Self::Cipher(_)
        )
    }
}
