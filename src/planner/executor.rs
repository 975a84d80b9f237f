//! Plan executor for applying deployment plans.
//!
//! Actions run one after another through the [`Reconciler`]. Identity and
//! phase changes land in the [`DeploymentState`] as they happen and, when a
//! store is attached, the state is saved after every action.

use tracing::{error, info, warn};

use crate::config::{ClusterSpec, TimeoutsConfig};
use crate::error::{ReconcileError, Result};
use crate::reconciler::Reconciler;
use crate::state::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, LifecyclePhase, StateStore,
};

use super::plan::{ActionType, DeploymentPlan, PlannedAction};

/// Executor for deployment plans.
pub struct PlanExecutor<'a> {
    /// Cluster lifecycle driver.
    reconciler: &'a Reconciler,
    /// Store saved after every action.
    store: Option<&'a dyn StateStore>,
    /// Whether to continue on errors.
    continue_on_error: bool,
}

/// Result of executing a single action.
#[derive(Debug)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Whether the action succeeded.
    pub success: bool,
    /// Remote cluster id after the action.
    pub cluster_id: Option<String>,
    /// Convergence mutations issued.
    pub mutations: usize,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Total actions executed.
    pub total_executed: usize,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Actions not attempted after a failure.
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
}

impl std::fmt::Debug for PlanExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("reconciler", self.reconciler)
            .field("store", &self.store.map(|s| s.backend_type()))
            .field("continue_on_error", &self.continue_on_error)
            .finish()
    }
}

impl<'a> PlanExecutor<'a> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(reconciler: &'a Reconciler) -> Self {
        Self {
            reconciler,
            store: None,
            continue_on_error: false,
        }
    }

    /// Saves the state to `store` after every action.
    #[must_use]
    pub const fn with_store(mut self, store: &'a dyn StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a deployment plan.
    ///
    /// Action failures are reported in the result, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be saved.
    pub async fn execute(
        &self,
        plan: &DeploymentPlan,
        state: &mut DeploymentState,
    ) -> Result<ExecutionResult> {
        info!("Executing deployment plan with {} actions", plan.actions.len());

        let mut results = Vec::new();

        for (idx, action) in plan.actions.iter().enumerate() {
            info!("Executing action {idx}: {}", action.description());

            let result = self.execute_action(idx, action, state).await;
            state.add_history(Self::history_entry(plan, &result));
            self.persist(state).await?;

            let failed = !result.success;
            results.push(result);

            if failed && !self.continue_on_error {
                warn!("Stopping after failed action {idx}");
                break;
            }
        }

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;

        let execution_result = ExecutionResult {
            total_executed: results.len(),
            successful,
            failed,
            skipped: plan.actions.len() - results.len(),
            success: failed == 0,
            results,
        };

        if execution_result.success {
            state.config_hash.clone_from(&plan.config_hash);
            self.persist(state).await?;
        }

        Ok(execution_result)
    }

    async fn persist(&self, state: &DeploymentState) -> Result<()> {
        match self.store {
            Some(store) => store.save(state).await,
            None => Ok(()),
        }
    }

    fn history_entry(plan: &DeploymentPlan, result: &ActionResult) -> DeploymentHistoryEntry {
        let operation = match result.action.action_type {
            ActionType::Create => DeploymentOperation::Create,
            ActionType::Update => DeploymentOperation::Update,
            ActionType::Replace => DeploymentOperation::Replace,
            ActionType::Delete => DeploymentOperation::Destroy,
        };
        let resources = vec![result.action.resource_name.clone()];

        match &result.error {
            None => DeploymentHistoryEntry::new(operation, &plan.config_hash, resources),
            Some(e) => DeploymentHistoryEntry::failed(operation, &plan.config_hash, resources, e),
        }
    }

    async fn execute_action(
        &self,
        index: usize,
        action: &PlannedAction,
        state: &mut DeploymentState,
    ) -> ActionResult {
        let outcome = match (action.action_type, &action.cluster) {
            (ActionType::Delete, _) => self.delete(action, state).await.map(|()| 0),
            (ActionType::Create, Some(spec)) => self.create(action, spec, state).await,
            (ActionType::Update, Some(spec)) => self.update(action, spec, state).await,
            (ActionType::Replace, Some(spec)) => {
                match self.delete(action, state).await {
                    Ok(()) => self.create(action, spec, state).await,
                    Err(e) => Err(e),
                }
            }
            (_, None) => Err(ReconcileError::Aborted {
                reason: format!("no manifest entry for cluster {}", action.resource_name),
            }
            .into()),
        };

        let cluster_id = state
            .get(&action.resource_name)
            .and_then(|r| r.cluster_id.clone());

        match outcome {
            Ok(mutations) => ActionResult {
                index,
                action: action.clone(),
                success: true,
                cluster_id,
                mutations,
                error: None,
            },
            Err(e) => {
                error!("Failed to {} cluster {}: {e}", action.action_type, action.resource_name);
                ActionResult {
                    index,
                    action: action.clone(),
                    success: false,
                    cluster_id,
                    mutations: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn create(
        &self,
        action: &PlannedAction,
        spec: &ClusterSpec,
        state: &mut DeploymentState,
    ) -> Result<usize> {
        let record = state.entry(&action.resource_name);
        let outcome = self.reconciler.create(spec, record).await;

        match &outcome {
            Ok(_) => {
                record.config_hash = action.new_hash.clone().unwrap_or_default();
                info!(
                    "Created cluster {} ({})",
                    action.resource_name,
                    record.cluster_id.as_deref().unwrap_or_default()
                );
            }
            Err(_) if !record.has_identity() => {
                state.remove(&action.resource_name);
            }
            Err(_) => {}
        }

        outcome
    }

    async fn update(
        &self,
        action: &PlannedAction,
        spec: &ClusterSpec,
        state: &mut DeploymentState,
    ) -> Result<usize> {
        let record = state.entry(&action.resource_name);
        let mutations = self.reconciler.update(spec, record).await?;
        record.config_hash = action.new_hash.clone().unwrap_or_default();
        Ok(mutations)
    }

    async fn delete(&self, action: &PlannedAction, state: &mut DeploymentState) -> Result<()> {
        let timeout = action
            .cluster
            .as_ref()
            .map_or_else(|| TimeoutsConfig::default().delete(), |c| c.timeouts.delete());

        let Some(record) = state.resources.get_mut(&action.resource_name) else {
            return Ok(());
        };

        self.reconciler.delete(record, timeout).await?;

        if record.phase == LifecyclePhase::NotExists {
            state.remove(&action.resource_name);
        }
        Ok(())
    }
}

impl ExecutionResult {
    /// Returns true if all actions succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }

    /// Error messages of the failed actions.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| {
                r.error
                    .as_ref()
                    .map(|e| format!("{}: {e}", r.action.resource_name))
            })
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.total_executed, self.successful, self.failed, self.skipped
        )
    }
}
