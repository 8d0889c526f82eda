/*!
Persisted record model.

A [`Record`] is one cookie-like item captured from the live store during a
snapshot. Records are plain owned values: the orchestrator moves a snapshot
`Vec<Record>` to the background worker and never shares it mutably.
*/

use crate::{PersistError, Result};
use serde::{Deserialize, Serialize};

/// Retention priority of a record, persisted as a single byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl Priority {
    /// Wire representation of this priority
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse the wire representation, rejecting unknown values
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            other => Err(PersistError::invalid_record(format!(
                "unknown priority byte {other}"
            ))),
        }
    }
}

/// Boolean policy flags of a record, persisted as one bitset byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RecordFlags {
    pub secure: bool,
    pub http_only: bool,
    pub cross_site_restricted: bool,
}

impl RecordFlags {
    const SECURE: u8 = 0b0000_0001;
    const HTTP_ONLY: u8 = 0b0000_0010;
    const CROSS_SITE_RESTRICTED: u8 = 0b0000_0100;
    const RESERVED: u8 = !(Self::SECURE | Self::HTTP_ONLY | Self::CROSS_SITE_RESTRICTED);

    pub fn to_byte(self) -> u8 {
        let mut bits = 0;
        if self.secure {
            bits |= Self::SECURE;
        }
        if self.http_only {
            bits |= Self::HTTP_ONLY;
        }
        if self.cross_site_restricted {
            bits |= Self::CROSS_SITE_RESTRICTED;
        }
        bits
    }

    /// Parse a flags byte. Reserved bits must be zero.
    pub fn from_byte(bits: u8) -> Result<Self> {
        if bits & Self::RESERVED != 0 {
            return Err(PersistError::invalid_record(format!(
                "reserved flag bits set: {bits:#010b}"
            )));
        }
        Ok(Self {
            secure: bits & Self::SECURE != 0,
            http_only: bits & Self::HTTP_ONLY != 0,
            cross_site_restricted: bits & Self::CROSS_SITE_RESTRICTED != 0,
        })
    }
}

/// One persisted unit (a cookie)
///
/// Timestamps are absolute 64-bit epoch values as handed out by the live
/// store; this crate never converts or rebases them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    /// Cookie name, part of the identity key
    pub name: String,

    /// Cookie value
    pub value: String,

    /// Owning domain, part of the identity key
    pub domain: String,

    /// Path scope, part of the identity key
    pub path: String,

    /// Creation time
    pub creation: i64,

    /// Expiration time; zero or negative marks a session record
    pub expiration: i64,

    /// Last access time
    pub last_access: i64,

    pub flags: RecordFlags,

    pub priority: Priority,
}

impl Record {
    /// Create a record with zeroed timestamps, no flags, and medium priority
    ///
    /// # Example
    /// ```rust
    /// use sessionvault_core::{Priority, Record};
    ///
    /// let record = Record::new("id", "1", "a.com", "/")
    ///     .with_times(100, 200, 150)
    ///     .with_secure(true)
    ///     .with_priority(Priority::Medium);
    /// assert_eq!(record.identity(), ("a.com", "/", "id"));
    /// ```
    pub fn new<N, V, D, P>(name: N, value: V, domain: D, path: P) -> Self
    where
        N: Into<String>,
        V: Into<String>,
        D: Into<String>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: path.into(),
            creation: 0,
            expiration: 0,
            last_access: 0,
            flags: RecordFlags::default(),
            priority: Priority::default(),
        }
    }

    /// Set creation, expiration, and last access times
    pub fn with_times(mut self, creation: i64, expiration: i64, last_access: i64) -> Self {
        self.creation = creation;
        self.expiration = expiration;
        self.last_access = last_access;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.flags.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.flags.http_only = http_only;
        self
    }

    pub fn with_cross_site_restricted(mut self, restricted: bool) -> Self {
        self.flags.cross_site_restricted = restricted;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Identity key as `(domain, path, name)`
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.domain, &self.path, &self.name)
    }

    /// Whether this record lives only for the browsing session
    pub fn is_session(&self) -> bool {
        self.expiration <= 0
    }

    /// Validate that the identity key is complete
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PersistError::validation("record name cannot be empty"));
        }
        if self.domain.is_empty() {
            return Err(PersistError::validation("record domain cannot be empty"));
        }
        if self.path.is_empty() {
            return Err(PersistError::validation("record path cannot be empty"));
        }
        Ok(())
    }
}
