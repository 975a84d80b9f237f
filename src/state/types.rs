//! State types for tracking provisioned clusters.
//!
//! The state file is the identity store: it maps each local cluster name to
//! the remote cluster id and the lifecycle phase it was last seen in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cloud::ClusterSnapshot;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// The complete deployment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Region the clusters live in.
    pub region: String,
    /// Hash of the last applied manifest.
    #[serde(default)]
    pub config_hash: String,
    /// Tracked clusters by local name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Deployment history (recent entries).
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// Lifecycle phase of a tracked cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// No remote cluster.
    #[default]
    NotExists,
    /// Create was called; waiting for `Running`.
    Creating,
    /// Running; applying the mutable fields.
    Converging,
    /// Converged with the manifest.
    Stable,
    /// Delete in progress.
    Deleting,
}

/// Identity slot of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Local cluster name (from the manifest).
    pub name: String,
    /// Remote cluster id; `None` until create returns.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Current phase.
    #[serde(default)]
    pub phase: LifecyclePhase,
    /// Hash of the cluster manifest last applied successfully.
    #[serde(default)]
    pub config_hash: String,
    /// Last observed remote state.
    #[serde(default)]
    pub snapshot: Option<ClusterSnapshot>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the operation occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Manifest hash at the time.
    pub config_hash: String,
    /// Clusters affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of deployment operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Cluster created.
    Create,
    /// Mutable fields converged.
    Update,
    /// Cluster deleted and created again.
    Replace,
    /// Cluster destroyed.
    Destroy,
}

impl DeploymentState {
    /// Creates a new empty deployment state.
    #[must_use]
    pub fn new(region: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            region: region.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by local name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Gets a record by local name, creating an empty one if needed.
    pub fn entry(&mut self, name: &str) -> &mut ResourceRecord {
        self.last_updated = Utc::now();
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| ResourceRecord::new(name))
    }

    /// Adds or replaces a record.
    pub fn set(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by local name.
    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        // Keep only the last 100 entries
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns records that have a remote identity.
    #[must_use]
    pub fn tracked(&self) -> Vec<&ResourceRecord> {
        self.resources
            .values()
            .filter(|r| r.cluster_id.is_some())
            .collect()
    }

    /// Returns all local names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

impl ResourceRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            cluster_id: None,
            phase: LifecyclePhase::NotExists,
            config_hash: String::new(),
            snapshot: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to a new phase.
    pub fn set_phase(&mut self, phase: LifecyclePhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Records the remote identity.
    pub fn set_identity(&mut self, cluster_id: &str) {
        self.cluster_id = Some(cluster_id.to_string());
        self.updated_at = Utc::now();
    }

    /// Forgets the remote identity.
    pub fn clear_identity(&mut self) {
        self.cluster_id = None;
        self.snapshot = None;
        self.phase = LifecyclePhase::NotExists;
        self.updated_at = Utc::now();
    }

    /// Returns true if the record points at a remote cluster.
    #[must_use]
    pub const fn has_identity(&self) -> bool {
        self.cluster_id.is_some()
    }
}

impl DeploymentHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            Self::NotExists => "not_exists",
            Self::Creating => "creating",
            Self::Converging => "converging",
            Self::Stable => "stable",
            Self::Deleting => "deleting",
        };
        write!(f, "{phase}")
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creates_empty_record() {
        let mut state = DeploymentState::new("cn-hangzhou");
        let record = state.entry("orders");
        assert_eq!(record.phase, LifecyclePhase::NotExists);
        assert!(!record.has_identity());
        assert_eq!(state.names(), vec!["orders"]);
    }

    #[test]
    fn test_clear_identity_resets_phase() {
        let mut record = ResourceRecord::new("orders");
        record.set_identity("pc-1");
        record.set_phase(LifecyclePhase::Stable);

        record.clear_identity();

        assert!(record.cluster_id.is_none());
        assert_eq!(record.phase, LifecyclePhase::NotExists);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("cn-hangzhou");
        for i in 0..150 {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Update,
                &format!("hash-{i}"),
                vec![],
            ));
        }
        assert_eq!(state.history.len(), 100);
        assert_eq!(state.history[0].config_hash, "hash-50");
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&LifecyclePhase::NotExists).expect("serializes");
        assert_eq!(json, "\"not_exists\"");
    }
}
