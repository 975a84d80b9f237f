//! State locking.
//!
//! A lock is a small JSON document stored next to the state. It names the
//! holder and the command that took it, and expires after
//! [`LOCK_EXPIRY_SECS`] so a crashed run never blocks the state forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StateError};

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Command that took the lock.
    #[serde(default)]
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock for `holder`; an empty holder gets a generated id.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder,
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    /// Fails with `LockedByOther` unless the lock has expired.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockedByOther` while the lock is live.
    pub fn ensure_expired(&self) -> Result<()> {
        if self.is_expired() {
            Ok(())
        } else {
            Err(StateError::LockedByOther {
                holder: format!("{} ({})", self.holder, self.operation),
                since: self.acquired_at.to_rfc3339(),
            }
            .into())
        }
    }

    /// Serializes the lock.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")).into())
    }

    /// Parses a stored lock.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Corrupted` if the document is not a lock.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            StateError::Corrupted {
                message: format!("Failed to parse lock: {e}"),
            }
            .into()
        })
    }
}

/// Generates a holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];

    format!("polarctl@{hostname}-{pid}-{suffix}")
}
