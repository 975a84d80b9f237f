//! Deployment plan types and construction.
//!
//! A plan is the ordered list of cluster actions produced from a diff:
//! deletes first, then creates, then replacements, then in-place updates.

use chrono::{DateTime, Utc};

use crate::config::{ClusterSpec, DeployConfig};
use crate::state::DeploymentState;

use super::diff::{DiffResult, DiffType, ResourceDiff};

/// A complete deployment plan.
#[derive(Debug)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Manifest hash this plan is based on.
    pub config_hash: String,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Local cluster name.
    pub resource_name: String,
    /// Desired cluster (absent for deletes).
    pub cluster: Option<ClusterSpec>,
    /// Remote cluster id, when one is tracked.
    pub cluster_id: Option<String>,
    /// Reason for this action.
    pub reason: String,
    /// Hash of the desired cluster.
    pub new_hash: Option<String>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a cluster.
    Create,
    /// Converge the mutable fields of a cluster.
    Update,
    /// Delete a cluster and create it again.
    Replace,
    /// Delete a cluster.
    Delete,
}

impl DeploymentPlan {
    /// Creates a new plan from a diff result.
    #[must_use]
    pub fn from_diff(diff: &DiffResult, config: &DeployConfig, config_hash: &str) -> Self {
        let mut actions = Vec::new();

        let order = [
            (DiffType::Delete, ActionType::Delete),
            (DiffType::Create, ActionType::Create),
            (DiffType::Replace, ActionType::Replace),
            (DiffType::Update, ActionType::Update),
        ];

        for (diff_type, action_type) in order {
            for resource_diff in diff.diffs.iter().filter(|d| d.diff_type == diff_type) {
                let cluster = config.cluster(&resource_diff.name).cloned();
                if cluster.is_none() && action_type != ActionType::Delete {
                    continue;
                }

                actions.push(PlannedAction {
                    action_type,
                    resource_name: resource_diff.name.clone(),
                    cluster,
                    cluster_id: resource_diff.cluster_id.clone(),
                    reason: Self::reason(resource_diff),
                    new_hash: resource_diff.new_hash.clone(),
                });
            }
        }

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    /// Creates a plan deleting every tracked cluster.
    #[must_use]
    pub fn destroy(state: &DeploymentState) -> Self {
        let actions = state
            .tracked()
            .into_iter()
            .map(|record| PlannedAction {
                action_type: ActionType::Delete,
                resource_name: record.name.clone(),
                cluster: None,
                cluster_id: record.cluster_id.clone(),
                reason: String::from("Destroy requested"),
                new_hash: None,
            })
            .collect();

        Self {
            created_at: Utc::now(),
            config_hash: state.config_hash.clone(),
            actions,
        }
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: vec![],
        }
    }

    fn reason(diff: &ResourceDiff) -> String {
        let fields = || {
            diff.details
                .iter()
                .map(|d| d.field.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        match diff.diff_type {
            DiffType::Create if diff.details.iter().any(|d| d.old_value.is_some()) => {
                String::from("Cluster no longer exists remotely")
            }
            DiffType::Create => String::from("Cluster defined in manifest"),
            DiffType::Update => format!("Changed: {}", fields()),
            DiffType::Replace => format!("Creation-only fields changed: {}", fields()),
            DiffType::Delete => String::from("Cluster removed from manifest"),
            DiffType::NoChange => String::new(),
        }
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of one type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    /// Returns true if the plan removes remote clusters.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a.action_type, ActionType::Delete | ActionType::Replace))
    }
}

impl PlannedAction {
    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create cluster '{}'", self.resource_name),
            ActionType::Update => format!("Update cluster '{}'", self.resource_name),
            ActionType::Replace => format!("Replace cluster '{}'", self.resource_name),
            ActionType::Delete => format!("Delete cluster '{}'", self.resource_name),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.resource_name)?;
        if let Some(id) = &self.cluster_id {
            write!(f, " [{id}]")?;
        }
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }

        Ok(())
    }
}
