//! Configuration for the persistence pipeline
//!
//! The payload location and the container magic token are passed in explicitly
//! through [`PersistConfig`] rather than read from process-wide constants, so
//! several independent logical stores can be persisted side by side.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::container::DEFAULT_MAGIC_TOKEN;
use crate::storage::LocalFileStorage;

/// Default payload file name
pub const DEFAULT_FILE_NAME: &str = "COOKIES.DAT";

fn default_file_name() -> String {
    DEFAULT_FILE_NAME.to_string()
}

fn default_magic_token() -> Vec<u8> {
    DEFAULT_MAGIC_TOKEN.to_vec()
}

fn default_consume_on_restore() -> bool {
    true
}

/// Configuration structure for one logical store's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Directory holding the payload (optional, defaults to current directory)
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Payload file name inside `base_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Leading token of every container
    #[serde(default = "default_magic_token")]
    pub magic_token: Vec<u8>,
    /// Delete the payload once it has been restored into a store
    #[serde(default = "default_consume_on_restore")]
    pub consume_on_restore: bool,
}

impl PersistConfig {
    /// Create a default configuration for a payload in the current directory
    pub fn default_local() -> Self {
        PersistConfig {
            base_dir: None,
            file_name: default_file_name(),
            magic_token: default_magic_token(),
            consume_on_restore: default_consume_on_restore(),
        }
    }

    /// Create a configuration rooted at `base_dir`
    pub fn with_base_dir<P: Into<PathBuf>>(base_dir: P) -> Self {
        PersistConfig {
            base_dir: Some(base_dir.into()),
            ..Self::default_local()
        }
    }

    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_magic_token<T: Into<Vec<u8>>>(mut self, magic_token: T) -> Self {
        self.magic_token = magic_token.into();
        self
    }

    pub fn with_consume_on_restore(mut self, consume: bool) -> Self {
        self.consume_on_restore = consume;
        self
    }

    /// Parse and validate a JSON configuration document
    ///
    /// Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: PersistConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Local filesystem adapter rooted at this configuration's base directory
    pub fn local_storage(&self) -> LocalFileStorage {
        match &self.base_dir {
            Some(dir) => LocalFileStorage::with_base_dir(dir),
            None => LocalFileStorage::new(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.file_name.is_empty() {
            return Err(crate::PersistError::validation(
                "payload file name cannot be empty",
            ));
        }
        if self.file_name.contains(['/', '\\']) || self.file_name == "." || self.file_name == ".."
        {
            return Err(crate::PersistError::validation(format!(
                "payload file name must not contain a path: {}",
                self.file_name
            )));
        }
        if self.magic_token.is_empty() {
            return Err(crate::PersistError::validation(
                "magic token cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self::default_local()
    }
}
