//! State store trait.
//!
//! A backend only moves two documents between memory and storage: the state
//! and its lock. Encoding, version checks and lock ownership are provided
//! methods of [`StateStore`], so every backend behaves the same way.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::types::{DeploymentState, STATE_VERSION};

/// A document kept by a state backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Document {
    /// The deployment state.
    State,
    /// The lock guarding the state.
    Lock,
}

impl Document {
    /// File or object name of the document.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::State => "state.json",
            Self::Lock => "state.lock",
        }
    }
}

/// Storage backend for the deployment state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a document, `None` if it does not exist.
    async fn read_document(&self, doc: Document) -> Result<Option<String>>;

    /// Replaces a document.
    async fn write_document(&self, doc: Document, content: &str) -> Result<()>;

    /// Removes a document. Removing a missing document succeeds.
    async fn remove_document(&self, doc: Document) -> Result<()>;

    /// Where a document lives, for logs.
    fn location(&self, doc: Document) -> String;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Loads the deployment state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<DeploymentState>> {
        let Some(content) = self.read_document(Document::State).await? else {
            debug!("No state at {}", self.location(Document::State));
            return Ok(None);
        };

        let state = decode_state(&content)?;
        info!(
            "Loaded state for {} ({} cluster(s)) from {}",
            state.region,
            state.resources.len(),
            self.location(Document::State)
        );
        Ok(Some(state))
    }

    /// Saves the deployment state.
    async fn save(&self, state: &DeploymentState) -> Result<()> {
        info!("Saving state to {}", self.location(Document::State));
        self.write_document(Document::State, &encode_state(state)?)
            .await
    }

    /// Deletes the deployment state and any lock.
    async fn delete(&self) -> Result<()> {
        info!("Deleting state at {}", self.location(Document::State));
        self.remove_document(Document::State).await?;
        self.remove_document(Document::Lock).await
    }

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool> {
        Ok(self.read_document(Document::State).await?.is_some())
    }

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_document(Document::Lock)
            .await?
            .as_deref()
            .map(LockInfo::from_json)
            .transpose()
    }

    /// Checks if the state is locked by a live lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Acquires the lock for `operation`, taking over an expired one.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        if let Some(existing) = self.get_lock_info().await? {
            existing.ensure_expired()?;
            warn!(
                "Taking over expired lock {} held by {}",
                existing.lock_id, existing.holder
            );
        }

        let lock = LockInfo::new(holder, operation);
        self.write_document(Document::Lock, &lock.to_json()?)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(
            "Acquired state lock {} for {operation} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    /// Releases the lock if `lock_id` still owns it.
    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.get_lock_info().await? {
            Some(current) if current.lock_id == lock_id => {
                self.remove_document(Document::Lock).await?;
                info!("Released state lock: {lock_id}");
            }
            Some(current) => warn!(
                "Lock {lock_id} is no longer held; current lock is {}",
                current.lock_id
            ),
            None => debug!("Lock {lock_id} already released"),
        }
        Ok(())
    }

    /// Removes the lock whoever holds it, even an unreadable one.
    async fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let existing = match self.get_lock_info().await {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Removing unreadable lock at {}: {e}", self.location(Document::Lock));
                None
            }
        };
        self.remove_document(Document::Lock).await?;
        Ok(existing)
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn read_document(&self, doc: Document) -> Result<Option<String>> {
        (**self).read_document(doc).await
    }

    async fn write_document(&self, doc: Document, content: &str) -> Result<()> {
        (**self).write_document(doc, content).await
    }

    async fn remove_document(&self, doc: Document) -> Result<()> {
        (**self).remove_document(doc).await
    }

    fn location(&self, doc: Document) -> String {
        (**self).location(doc)
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Parses a stored state document and checks its format version.
///
/// # Errors
///
/// Returns `StateError::Corrupted` for malformed JSON and
/// `StateError::VersionMismatch` for an unknown format version.
pub fn decode_state(content: &str) -> Result<DeploymentState> {
    let state: DeploymentState = serde_json::from_str(content).map_err(|e| StateError::Corrupted {
        message: format!("Failed to parse state: {e}"),
    })?;

    if state.version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: state.version,
        }
        .into());
    }

    Ok(state)
}

/// Serializes a state document.
///
/// # Errors
///
/// Returns a serialization error if encoding fails.
pub fn encode_state(state: &DeploymentState) -> Result<String> {
    serde_json::to_string_pretty(state)
        .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")).into())
}
