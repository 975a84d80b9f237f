//! Ordered convergence of mutable fields.
//!
//! A [`ConvergencePlan`] turns a set of dirty fields into one step per field,
//! in a fixed order. The [`StepRunner`] executes the steps one by one and
//! stops at the first failure; a field is marked clean only after its
//! mutation and any wait that follows it succeed.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::cloud::{
    ModifyAutoRenewRequest, ModifyParametersRequest, PeriodUnit, PolarDbApi, StatePoller,
    WaitSpec,
};
use crate::config::{BillingTerm, ClusterSpec, LOCALHOST_IP, RenewalStatus, WaitSettings};
use crate::error::{ReconcileError, Result};

use super::dirty::{DirtyFields, FieldTag};

/// Which convergence pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Right after create; the description was sent with the create call.
    Initial,
    /// Any later pass.
    Subsequent,
}

impl PassKind {
    /// Whether the pass converges `field`.
    #[must_use]
    pub fn applies_to(self, field: FieldTag) -> bool {
        !(self == Self::Initial && field == FieldTag::Description)
    }
}

/// Remote call issued by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// `ModifyDBClusterParameters`.
    Parameters(ModifyParametersRequest),
    /// `ModifyAutoRenewAttribute`.
    Renewal(ModifyAutoRenewRequest),
    /// `ModifyDBClusterMaintainTime`.
    MaintainTime(String),
    /// `ModifyDBClusterDescription`.
    Description(String),
    /// `ModifyDBClusterAccessWhitelist`, comma separated.
    SecurityIps(String),
}

impl StepAction {
    /// Remote action name.
    #[must_use]
    pub const fn action_name(&self) -> &'static str {
        match self {
            Self::Parameters(_) => "ModifyDBClusterParameters",
            Self::Renewal(_) => "ModifyAutoRenewAttribute",
            Self::MaintainTime(_) => "ModifyDBClusterMaintainTime",
            Self::Description(_) => "ModifyDBClusterDescription",
            Self::SecurityIps(_) => "ModifyDBClusterAccessWhitelist",
        }
    }
}

/// One field's mutation with its surrounding waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceStep {
    /// Field converged by this step.
    pub field: FieldTag,
    /// Remote call.
    pub action: StepAction,
    /// Wait that must succeed before the call.
    pub wait_before: Option<WaitSpec>,
    /// Wait that must succeed before the field counts as clean.
    pub wait_after: Option<WaitSpec>,
}

/// Steps for one cluster, in convergence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergencePlan {
    /// Cluster id.
    pub cluster_id: String,
    /// Steps to execute.
    pub steps: Vec<ConvergenceStep>,
}

impl ConvergencePlan {
    /// Builds the steps for the dirty fields of a cluster.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPeriod` if the renewal period cannot be
    /// expressed in months or years.
    pub fn build(
        cluster_id: &str,
        desired: &ClusterSpec,
        dirty: &DirtyFields,
        pass: PassKind,
        waits: &WaitSettings,
    ) -> Result<Self> {
        let mut steps = Vec::with_capacity(dirty.len());

        for field in dirty.iter().filter(|f| pass.applies_to(*f)) {
            let step = match field {
                FieldTag::Parameters => {
                    let parameters: BTreeMap<String, String> = desired
                        .parameters
                        .iter()
                        .map(|p| (p.name.clone(), p.value.clone()))
                        .collect();
                    ConvergenceStep {
                        field,
                        action: StepAction::Parameters(ModifyParametersRequest {
                            db_cluster_id: cluster_id.to_string(),
                            parameters,
                            effective_time: desired.effective_time,
                        }),
                        wait_before: None,
                        wait_after: None,
                    }
                }
                FieldTag::Renewal => {
                    let BillingTerm::Prepaid { renewal, .. } = desired.billing_term() else {
                        debug!("Skipping renewal on postpaid cluster {cluster_id}");
                        continue;
                    };
                    let (duration, period_unit) = if renewal.status == RenewalStatus::AutoRenewal {
                        let (value, unit) =
                            PeriodUnit::split_months(renewal.auto_renew_period_months)?;
                        (Some(value), Some(unit))
                    } else {
                        (None, None)
                    };
                    let timeout = desired.timeouts.update();
                    ConvergenceStep {
                        field,
                        action: StepAction::Renewal(ModifyAutoRenewRequest {
                            db_cluster_id: cluster_id.to_string(),
                            renewal_status: renewal.status,
                            duration,
                            period_unit,
                        }),
                        wait_before: Some(WaitSpec::running(waits, Duration::ZERO, timeout)),
                        wait_after: Some(WaitSpec::running(waits, waits.update_delay(), timeout)),
                    }
                }
                FieldTag::MaintainTime => ConvergenceStep {
                    field,
                    action: StepAction::MaintainTime(
                        desired.maintain_time.clone().unwrap_or_default(),
                    ),
                    wait_before: None,
                    wait_after: None,
                },
                FieldTag::Description => ConvergenceStep {
                    field,
                    action: StepAction::Description(desired.description.clone().unwrap_or_default()),
                    wait_before: None,
                    wait_after: None,
                },
                FieldTag::SecurityIps => {
                    let ips = desired.effective_security_ips().unwrap_or_default();
                    let joined = if ips.is_empty() {
                        LOCALHOST_IP.to_string()
                    } else {
                        ips.into_iter().collect::<Vec<_>>().join(",")
                    };
                    ConvergenceStep {
                        field,
                        action: StepAction::SecurityIps(joined),
                        wait_before: None,
                        wait_after: None,
                    }
                }
            };
            steps.push(step);
        }

        Ok(Self {
            cluster_id: cluster_id.to_string(),
            steps,
        })
    }

    /// Returns true if there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fields touched by the plan, in order.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldTag> {
        self.steps.iter().map(|s| s.field).collect()
    }
}

/// Executes a [`ConvergencePlan`].
pub struct StepRunner<'a> {
    api: &'a dyn PolarDbApi,
    poller: &'a StatePoller,
}

impl std::fmt::Debug for StepRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRunner").finish_non_exhaustive()
    }
}

impl<'a> StepRunner<'a> {
    /// Creates a runner.
    #[must_use]
    pub const fn new(api: &'a dyn PolarDbApi, poller: &'a StatePoller) -> Self {
        Self { api, poller }
    }

    /// Runs every step in order, marking fields clean as they complete.
    ///
    /// Returns the number of steps executed.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::StepFailed` naming the first step that
    /// failed; later steps are not attempted.
    pub async fn run(&self, plan: &ConvergencePlan, dirty: &mut DirtyFields) -> Result<usize> {
        let cluster_id = plan.cluster_id.as_str();

        for (index, step) in plan.steps.iter().enumerate() {
            info!(
                "Converging {} on cluster {cluster_id} ({}/{})",
                step.field,
                index + 1,
                plan.steps.len()
            );

            self.run_step(cluster_id, step)
                .await
                .map_err(|source| ReconcileError::StepFailed {
                    resource_id: cluster_id.to_string(),
                    step: step.field.to_string(),
                    source: Box::new(source),
                })?;

            dirty.mark_clean(step.field);
        }

        Ok(plan.steps.len())
    }

    async fn run_step(&self, cluster_id: &str, step: &ConvergenceStep) -> Result<()> {
        if let Some(wait) = &step.wait_before {
            self.poller.wait_for(cluster_id, wait).await?;
        }

        debug!("{} on cluster {cluster_id}", step.action.action_name());
        match &step.action {
            StepAction::Parameters(request) => {
                self.api.modify_db_cluster_parameters(request).await?;
            }
            StepAction::Renewal(request) => {
                self.api.modify_auto_renew_attribute(request).await?;
            }
            StepAction::MaintainTime(window) => {
                self.api
                    .modify_db_cluster_maintain_time(cluster_id, window)
                    .await?;
            }
            StepAction::Description(description) => {
                self.api
                    .modify_db_cluster_description(cluster_id, description)
                    .await?;
            }
            StepAction::SecurityIps(ips) => {
                self.api
                    .modify_db_cluster_access_whitelist(cluster_id, ips)
                    .await?;
            }
        }

        if let Some(wait) = &step.wait_after {
            self.poller.wait_for(cluster_id, wait).await?;
        }

        Ok(())
    }
}
