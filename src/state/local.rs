//! Local file-based state storage backend.
//!
//! The state lives in `.polardb/state.json` next to the manifest unless a
//! path is configured, with the lock beside it. Documents are replaced by
//! renaming a synced temporary file over them.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ProvisionerError, Result, StateError};

use super::store::{Document, StateStore};

/// Default state directory name.
pub const STATE_DIR: &str = ".polardb";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    dir: PathBuf,
    state_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store in `.polardb/` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| {
            ProvisionerError::internal(format!("Cannot determine current directory: {e}"))
        })?;
        Ok(Self::with_base_dir(cwd.join(STATE_DIR)))
    }

    /// Creates a store in a custom directory.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let state_path = dir.join(Document::State.file_name());
        Self { dir, state_path }
    }

    /// Creates a store from a custom state file path; the lock sits beside it.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let dir = state_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self { dir, state_path }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn path(&self, doc: Document) -> PathBuf {
        match doc {
            Document::State => self.state_path.clone(),
            Document::Lock => self.dir.join(doc.file_name()),
        }
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(&self.dir, "create", &e))
    }
}

fn write_error(path: &Path, step: &str, e: &std::io::Error) -> ProvisionerError {
    StateError::write(format!("Failed to {step} {}: {e}", path.display())).into()
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn read_document(&self, doc: Document) -> Result<Option<String>> {
        let path = self.path(doc);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Corrupted {
                message: format!("Failed to read {}: {e}", path.display()),
            }
            .into()),
        }
    }

    async fn write_document(&self, doc: Document, content: &str) -> Result<()> {
        self.ensure_dir().await?;

        let path = self.path(doc);
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| write_error(&temp, "create", &e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| write_error(&temp, "write", &e))?;
        file.sync_all()
            .await
            .map_err(|e| write_error(&temp, "sync", &e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| write_error(&path, "replace", &e))?;

        debug!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    async fn remove_document(&self, doc: Document) -> Result<()> {
        let path = self.path(doc);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(write_error(&path, "remove", &e)),
        }
    }

    fn location(&self, doc: Document) -> String {
        self.path(doc).display().to_string()
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DeploymentState, LifecyclePhase, ResourceRecord};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut state = DeploymentState::new("cn-hangzhou");
        let record = state.entry("orders");
        record.set_identity("pc-1");
        record.set_phase(LifecyclePhase::Stable);
        store.save(&state).await.expect("Failed to save state");

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.region, "cn-hangzhou");
        let record: &ResourceRecord = loaded.get("orders").expect("record saved");
        assert_eq!(record.cluster_id.as_deref(), Some("pc-1"));
        assert_eq!(record.phase, LifecyclePhase::Stable);
        assert!(!store.state_path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
        assert!(!store.exists().await.expect("exists check"));
    }

    #[tokio::test]
    async fn test_corrupted_state_is_reported() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.expect("dir created");
        fs::write(store.state_path(), "{ not json")
            .await
            .expect("write garbage");

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(
            err,
            ProvisionerError::State(StateError::Corrupted { .. })
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("ci", "apply")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));
        assert_eq!(
            store
                .get_lock_info()
                .await
                .expect("lock info")
                .map(|l| l.operation),
            Some(String::from("apply"))
        );

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock = store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("Failed to acquire first lock");

        let err = store
            .acquire_lock("holder-2", "destroy")
            .await
            .expect_err("second lock refused");
        assert!(matches!(
            err,
            ProvisionerError::State(StateError::LockedByOther { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();
        store
            .acquire_lock("holder-1", "apply")
            .await
            .expect("lock acquired");

        store.release_lock("other").await.expect("no error");
        assert!(store.is_locked().await.expect("is_locked"));

        let removed = store.force_unlock().await.expect("force unlock");
        assert_eq!(removed.map(|l| l.holder), Some(String::from("holder-1")));
        assert!(!store.is_locked().await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_custom_state_path_keeps_lock_beside_it() {
        let temp = TempDir::new().expect("temp dir");
        let state_path = temp.path().join("envs").join("prod.json");
        let store = LocalStateStore::with_state_path(&state_path);

        store
            .save(&DeploymentState::new("cn-beijing"))
            .await
            .expect("save creates the directory");
        store.acquire_lock("ci", "apply").await.expect("lock");

        assert!(state_path.exists());
        assert!(temp.path().join("envs").join("state.lock").exists());

        store.delete().await.expect("delete");
        assert!(!state_path.exists());
        assert!(!store.is_locked().await.expect("is_locked"));
    }
}
