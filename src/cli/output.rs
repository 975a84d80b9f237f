//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cloud::{ClusterSnapshot, ClusterStatus, ClusterSummary};
use crate::config::ValidationResult;
use crate::planner::{ActionType, DeploymentPlan, DiffResult, DriftReport, ExecutionResult};
use crate::state::{DeploymentState, LifecyclePhase, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Tracked cluster row for table display.
#[derive(Tabled)]
struct ClusterStatusRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Zone")]
    zone: String,
}

/// Listed cluster row for table display.
#[derive(Tabled)]
struct ClusterListRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Engine")]
    engine: String,
    #[tabled(rename = "Pay type")]
    pay_type: String,
    #[tabled(rename = "Nodes")]
    nodes: usize,
    #[tabled(rename = "Zone")]
    zone: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Cluster")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan, with field level changes when `diff` is given.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, diff: Option<&DiffResult>) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::new(plan, diff)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, diff),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, diff: Option<&DiffResult>) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - clusters match the manifest.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        output.push_str("\nDeployment Plan\n");
        let _ = write!(output, "   Manifest hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.resource_name.clone(),
                id: a.cluster_id.clone().unwrap_or_else(|| String::from("-")),
                reason: truncate(&a.reason, 50),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if let Some(diff) = diff {
            output.push_str("\nChanges:\n");
            for resource in diff.actionable_diffs() {
                let _ = writeln!(output, "   {resource}");
                for detail in &resource.details {
                    let _ = writeln!(
                        output,
                        "       {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)"),
                        detail.new_value.as_deref().unwrap_or("(none)")
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Replace).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red()
        );

        output
    }

    /// Formats the result of an apply or destroy.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ExecutionJson::from(result)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.success {
                    format!("{} {result}\n", "✓".green())
                } else {
                    format!("{} {result}\n", "✗".red())
                };

                let errors = result.errors();
                if !errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                output
            }
        }
    }

    /// Formats tracked clusters with their latest snapshots.
    #[must_use]
    pub fn format_status(
        &self,
        state: &DeploymentState,
        observed: &BTreeMap<String, ClusterSnapshot>,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let clusters: Vec<StatusJson> = state
                    .resources
                    .values()
                    .map(|r| StatusJson {
                        name: r.name.clone(),
                        cluster_id: r.cluster_id.clone(),
                        phase: r.phase.to_string(),
                        snapshot: observed.get(&r.name),
                    })
                    .collect();
                serde_json::to_string_pretty(&clusters).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("\nRegion: {}\n\n", state.region);

                if state.resources.is_empty() {
                    output.push_str("   No clusters tracked.\n");
                    return output;
                }

                let rows: Vec<ClusterStatusRow> = state
                    .resources
                    .values()
                    .map(|r| {
                        let snapshot = observed.get(&r.name);
                        ClusterStatusRow {
                            name: r.name.clone(),
                            id: r.cluster_id.clone().unwrap_or_else(|| String::from("-")),
                            phase: Self::format_phase(r.phase),
                            status: snapshot.map_or_else(
                                || "missing".red().to_string(),
                                |s| Self::format_cluster_status(&s.status),
                            ),
                            engine: snapshot.map_or_else(String::new, |s| {
                                format!("{} {}", s.db_type, s.db_version)
                            }),
                            class: snapshot.map_or_else(String::new, |s| s.db_node_class.clone()),
                            zone: snapshot.map_or_else(String::new, |s| s.zone_ids.clone()),
                        }
                    })
                    .collect();

                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                let running = observed.values().filter(|s| s.is_running()).count();
                let _ = write!(
                    output,
                    "\n{} tracked, {} observed, {} running\n",
                    state.resources.len(),
                    observed.len(),
                    running
                );
                output
            }
        }
    }

    /// Formats listed clusters.
    #[must_use]
    pub fn format_clusters(&self, clusters: &[ClusterSummary]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(clusters).unwrap_or_default(),
            OutputFormat::Text => {
                if clusters.is_empty() {
                    return String::from("No clusters found.\n");
                }

                let rows: Vec<ClusterListRow> = clusters
                    .iter()
                    .map(|c| ClusterListRow {
                        id: c.id.clone(),
                        description: truncate(&c.description, 30),
                        status: Self::format_cluster_status(&c.status),
                        engine: format!("{} {}", c.db_type, c.db_version),
                        pay_type: c.pay_type.to_string(),
                        nodes: c.nodes.len(),
                        zone: c.zone_id.clone(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = write!(output, "\n\n{} cluster(s)\n", clusters.len());
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - clusters match the manifest.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} clusters have drifted.\n",
                        report.drifted_resources.len(),
                        report.total_resources
                    );
                    output
                }
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Manifest is valid\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\nState: {}\n\n", state.region);

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Manifest hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Clusters: {}", state.resources.len());

                for record in state.resources.values() {
                    let _ = writeln!(
                        output,
                        "     {} {} ({})",
                        record.name,
                        record.cluster_id.as_deref().unwrap_or("-"),
                        record.phase
                    );
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {:?} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a state lock.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "Lock {} held by {} for {} ({}s remaining)\n",
                lock.lock_id,
                lock.holder,
                if lock.operation.is_empty() { "-" } else { lock.operation.as_str() },
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, success: bool, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let status = if success { "success" } else { "error" };
                serde_json::json!({ "status": status, "message": message }).to_string()
            }
            OutputFormat::Text if success => format!("{} {message}", "✓".green()),
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Replace => "-/+replace".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }

    fn format_phase(phase: LifecyclePhase) -> String {
        match phase {
            LifecyclePhase::Stable => phase.to_string().green().to_string(),
            LifecyclePhase::NotExists => phase.to_string().dimmed().to_string(),
            _ => phase.to_string().yellow().to_string(),
        }
    }

    /// Formats a cluster status with color.
    fn format_cluster_status(status: &ClusterStatus) -> String {
        match status {
            ClusterStatus::Running => "Running".green().to_string(),
            ClusterStatus::Deleting => "Deleting".red().to_string(),
            ClusterStatus::Other(s) => s.dimmed().to_string(),
            other => other.to_string().yellow().to_string(),
        }
    }
}

/// First eight characters of a hash.
fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    cluster_id: Option<String>,
    reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changes: Vec<ChangeJson>,
}

#[derive(serde::Serialize)]
struct ChangeJson {
    field: String,
    old_value: Option<String>,
    new_value: Option<String>,
}

impl PlanJson {
    fn new(plan: &DeploymentPlan, diff: Option<&DiffResult>) -> Self {
        let changes_for = |name: &str| -> Vec<ChangeJson> {
            diff.and_then(|d| d.diffs.iter().find(|r| r.name == name))
                .map(|r| {
                    r.details
                        .iter()
                        .map(|d| ChangeJson {
                            field: d.field.clone(),
                            old_value: d.old_value.clone(),
                            new_value: d.new_value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            replaces: plan.count(ActionType::Replace),
            deletes: plan.count(ActionType::Delete),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.resource_name.clone(),
                    cluster_id: a.cluster_id.clone(),
                    reason: a.reason.clone(),
                    changes: changes_for(&a.resource_name),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct StatusJson<'a> {
    name: String,
    cluster_id: Option<String>,
    phase: String,
    snapshot: Option<&'a ClusterSnapshot>,
}

#[derive(serde::Serialize)]
struct ExecutionJson {
    success: bool,
    successful: usize,
    failed: usize,
    skipped: usize,
    actions: Vec<ActionResultJson>,
}

#[derive(serde::Serialize)]
struct ActionResultJson {
    action_type: String,
    resource: String,
    cluster_id: Option<String>,
    success: bool,
    mutations: usize,
    error: Option<String>,
}

impl From<&ExecutionResult> for ExecutionJson {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            success: result.success,
            successful: result.successful,
            failed: result.failed,
            skipped: result.skipped,
            actions: result
                .results
                .iter()
                .map(|r| ActionResultJson {
                    action_type: r.action.action_type.to_string(),
                    resource: r.action.resource_name.clone(),
                    cluster_id: r.cluster_id.clone(),
                    success: r.success,
                    mutations: r.mutations,
                    error: r.error.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedAction;

    fn plan() -> DeploymentPlan {
        let mut plan = DeploymentPlan::empty("0123456789abcdef");
        plan.actions.push(PlannedAction {
            action_type: ActionType::Delete,
            resource_name: String::from("legacy"),
            cluster: None,
            cluster_id: Some(String::from("pc-9")),
            reason: String::from("Cluster removed from manifest"),
            new_hash: None,
        });
        plan
    }

    #[test]
    fn test_plan_text_lists_actions() {
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), None);

        assert!(output.contains("legacy"));
        assert!(output.contains("pc-9"));
        assert!(output.contains("01234567"));
    }

    #[test]
    fn test_plan_json_counts() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), None);
        let json: serde_json::Value = serde_json::from_str(&output).expect("valid json");

        assert_eq!(json["deletes"], 1);
        assert_eq!(json["actions"][0]["cluster_id"], "pc-9");
    }

    #[test]
    fn test_status_reports_missing_cluster() {
        let mut state = DeploymentState::new("cn-hangzhou");
        state.entry("orders").set_identity("pc-1");

        let output =
            OutputFormatter::new(OutputFormat::Text).format_status(&state, &BTreeMap::new());

        assert!(output.contains("orders"));
        assert!(output.contains("missing"));
        assert!(output.contains("1 tracked, 0 observed"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
        assert_eq!(short("abc"), "abc");
    }
}
