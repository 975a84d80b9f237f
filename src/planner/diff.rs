//! Diff engine for comparing the manifest with observed clusters.
//!
//! Each manifest cluster is compared with the snapshot of the remote
//! cluster recorded for it in the state. Clusters tracked in the state but
//! missing from the manifest are scheduled for deletion.

use std::collections::BTreeMap;
use tracing::debug;

use crate::cloud::ClusterSnapshot;
use crate::config::{ClusterSpec, ConfigHasher, DeployConfig};
use crate::error::Result;
use crate::reconciler::{DirtyFields, FieldTag, Reconciler, compute_dirty, immutable_changes};
use crate::state::{DeploymentState, ResourceRecord};

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single cluster.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Local cluster name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Remote cluster id, when one is tracked.
    pub cluster_id: Option<String>,
    /// Field level differences.
    pub details: Vec<DiffDetail>,
    /// Mutable fields to converge (updates only).
    pub dirty: DirtyFields,
    /// Hash recorded at the last apply.
    pub old_hash: Option<String>,
    /// Hash of the manifest entry.
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Cluster needs to be created.
    Create,
    /// Mutable fields need converging.
    Update,
    /// A creation-only field changed; delete and create again.
    Replace,
    /// Cluster is no longer in the manifest.
    Delete,
    /// Cluster matches the manifest.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Observed value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All cluster diffs, manifest order first.
    pub diffs: Vec<ResourceDiff>,
    /// Number of clusters to create.
    pub creates: usize,
    /// Number of clusters to update.
    pub updates: usize,
    /// Number of clusters to replace.
    pub replaces: usize,
    /// Number of clusters to delete.
    pub deletes: usize,
    /// Number of unchanged clusters.
    pub unchanged: usize,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Clusters whose remote state differs from the manifest.
    pub drifted_resources: Vec<String>,
    /// Number of clusters in the manifest.
    pub total_resources: usize,
    /// Number of clusters observed remotely.
    pub observed_count: usize,
}

/// Refreshes the snapshot of every tracked cluster.
///
/// Clusters that no longer exist are left out of the map.
///
/// # Errors
///
/// Returns an error if a describe call fails for another reason than the
/// cluster being gone.
pub async fn observe(
    reconciler: &Reconciler,
    state: Option<&DeploymentState>,
) -> Result<BTreeMap<String, ClusterSnapshot>> {
    let mut observed = BTreeMap::new();
    let Some(state) = state else {
        return Ok(observed);
    };

    for record in state.tracked() {
        let mut scratch = record.clone();
        if let Some(snapshot) = reconciler.read(&mut scratch).await? {
            observed.insert(record.name.clone(), snapshot);
        }
    }

    debug!("Observed {} cluster(s)", observed.len());
    Ok(observed)
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between the manifest and the observed clusters.
    ///
    /// `observed` maps local names to fresh snapshots, see [`observe`].
    #[must_use]
    pub fn compute_diff(
        &self,
        config: &DeployConfig,
        state: Option<&DeploymentState>,
        observed: &BTreeMap<String, ClusterSnapshot>,
    ) -> DiffResult {
        let mut diffs = Vec::new();

        for cluster in &config.clusters {
            let new_hash = self.hasher.hash_cluster(cluster);
            let record = state.and_then(|s| s.get(&cluster.name));
            let snapshot = observed.get(&cluster.name);

            diffs.push(Self::compute_cluster_diff(cluster, record, snapshot, new_hash));
        }

        if let Some(state) = state {
            for record in state.tracked() {
                if config.cluster(&record.name).is_none() {
                    debug!("Cluster {} is no longer in the manifest", record.name);
                    diffs.push(ResourceDiff {
                        name: record.name.clone(),
                        diff_type: DiffType::Delete,
                        cluster_id: record.cluster_id.clone(),
                        details: vec![DiffDetail {
                            field: String::from("cluster"),
                            old_value: record.cluster_id.clone(),
                            new_value: None,
                        }],
                        dirty: DirtyFields::new(),
                        old_hash: non_empty(&record.config_hash),
                        new_hash: None,
                    });
                }
            }
        }

        let count = |kind: DiffType| diffs.iter().filter(|d| d.diff_type == kind).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let replaces = count(DiffType::Replace);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        }
    }

    fn compute_cluster_diff(
        cluster: &ClusterSpec,
        record: Option<&ResourceRecord>,
        snapshot: Option<&ClusterSnapshot>,
        new_hash: String,
    ) -> ResourceDiff {
        let cluster_id = record.and_then(|r| r.cluster_id.clone());
        let old_hash = record.and_then(|r| non_empty(&r.config_hash));

        let mut diff = ResourceDiff {
            name: cluster.name.clone(),
            diff_type: DiffType::NoChange,
            cluster_id: cluster_id.clone(),
            details: Vec::new(),
            dirty: DirtyFields::new(),
            old_hash,
            new_hash: Some(new_hash),
        };

        let Some(snapshot) = snapshot else {
            debug!("Cluster {} needs to be created", cluster.name);
            diff.diff_type = DiffType::Create;
            diff.details.push(DiffDetail {
                field: String::from("cluster"),
                old_value: cluster_id.map(|id| format!("missing (was {id})")),
                new_value: Some(cluster.name.clone()),
            });
            diff.cluster_id = None;
            return diff;
        };

        let immutable = immutable_changes(cluster, snapshot);
        if !immutable.is_empty() {
            debug!("Cluster {} needs to be replaced", cluster.name);
            diff.diff_type = DiffType::Replace;
            diff.details = immutable
                .into_iter()
                .map(|change| DiffDetail {
                    field: change.field.to_string(),
                    old_value: Some(change.current),
                    new_value: Some(change.desired),
                })
                .collect();
            return diff;
        }

        let dirty = compute_dirty(cluster, snapshot);
        if !dirty.is_empty() {
            debug!("Cluster {} needs update ({dirty})", cluster.name);
            diff.diff_type = DiffType::Update;
            diff.details = dirty
                .iter()
                .map(|tag| field_detail(tag, cluster, snapshot))
                .collect();
            diff.dirty = dirty;
        }

        diff
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Renders the observed and desired value of a mutable field.
fn field_detail(tag: FieldTag, cluster: &ClusterSpec, snapshot: &ClusterSnapshot) -> DiffDetail {
    let (old_value, new_value) = match tag {
        FieldTag::Parameters => {
            let changed: Vec<_> = cluster
                .parameters
                .iter()
                .filter(|p| snapshot.parameters.get(&p.name) != Some(&p.value))
                .collect();
            let old = changed
                .iter()
                .map(|p| {
                    let current = snapshot.parameters.get(&p.name).map_or("-", String::as_str);
                    format!("{}={current}", p.name)
                })
                .collect::<Vec<_>>()
                .join(",");
            let new = changed
                .iter()
                .map(|p| format!("{}={}", p.name, p.value))
                .collect::<Vec<_>>()
                .join(",");
            (Some(old), Some(new))
        }
        FieldTag::Renewal => {
            let old = snapshot
                .renewal
                .map(|r| format!("{} ({} months)", r.status, r.duration_months));
            let new = format!(
                "{} ({} months)",
                cluster.renewal_status, cluster.auto_renew_period
            );
            (old, Some(new))
        }
        FieldTag::MaintainTime => (
            Some(snapshot.maintain_time.clone()),
            cluster.maintain_time.clone(),
        ),
        FieldTag::Description => (
            Some(snapshot.description.clone()),
            cluster.description.clone(),
        ),
        FieldTag::SecurityIps => {
            let old = snapshot
                .security_ips
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            let new = cluster
                .effective_security_ips()
                .map(|ips| ips.into_iter().collect::<Vec<_>>().join(","));
            (Some(old), new)
        }
    };

    DiffDetail {
        field: tag.to_string(),
        old_value,
        new_value,
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }

    /// Builds a drift report from this diff.
    #[must_use]
    pub fn drift_report(&self, total_resources: usize, observed_count: usize) -> DriftReport {
        let drifted_resources: Vec<String> = self
            .actionable_diffs()
            .into_iter()
            .map(|d| d.name.clone())
            .collect();

        DriftReport {
            has_drift: !drifted_resources.is_empty(),
            drifted_resources,
            total_resources,
            observed_count,
        }
    }
}

impl DriftReport {
    /// Returns true if the clusters match the manifest.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            let fields: Vec<_> = self.details.iter().map(|d| d.field.as_str()).collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - clusters match the manifest")?;
        }
        Ok(())
    }
}
