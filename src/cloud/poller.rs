//! Wait-for-state polling.
//!
//! A [`StatePoller`] describes a cluster repeatedly until its status reaches
//! a target, enters a failure state or the deadline passes. Each wait runs
//! in the calling task; the time budget is a bound on local polling only and
//! never cancels the remote operation.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::WaitSettings;
use crate::error::{Result, WaitError};

use super::client::PolarDbApi;
use super::types::ClusterStatus;

/// Statuses a cluster passes through while a mutation is applied.
const TRANSIENT: [ClusterStatus; 4] = [
    ClusterStatus::Creating,
    ClusterStatus::Maintaining,
    ClusterStatus::Rebooting,
    ClusterStatus::ClassChanging,
];

/// Parameters of a single wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    /// Statuses that mean "not yet"; anything else is unexpected.
    pub pending: Vec<ClusterStatus>,
    /// Statuses that end the wait successfully.
    pub target: Vec<ClusterStatus>,
    /// Statuses that end the wait with an error.
    pub fail: Vec<ClusterStatus>,
    /// Sleep before the first poll.
    pub delay: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Total budget, including the initial delay.
    pub timeout: Duration,
    /// Consecutive not-found answers tolerated.
    pub not_found_checks: u32,
}

impl WaitSpec {
    /// Wait for a freshly created cluster: `Creating` until `Running`.
    #[must_use]
    pub fn creation(settings: &WaitSettings, timeout: Duration) -> Self {
        Self {
            pending: vec![ClusterStatus::Creating],
            target: vec![ClusterStatus::Running],
            fail: vec![ClusterStatus::Deleting],
            delay: settings.create_delay(),
            poll_interval: settings.poll_interval(),
            timeout,
            not_found_checks: settings.not_found_checks,
        }
    }

    /// Wait until the cluster is `Running` again through the transient statuses.
    #[must_use]
    pub fn running(settings: &WaitSettings, delay: Duration, timeout: Duration) -> Self {
        Self {
            pending: TRANSIENT.to_vec(),
            target: vec![ClusterStatus::Running],
            fail: vec![ClusterStatus::Deleting],
            delay,
            poll_interval: settings.poll_interval(),
            timeout,
            not_found_checks: settings.not_found_checks,
        }
    }

    fn target_names(&self) -> String {
        self.target
            .iter()
            .map(ClusterStatus::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Polls cluster status until a wait condition resolves.
#[derive(Clone)]
pub struct StatePoller {
    /// Control-plane API.
    api: Arc<dyn PolarDbApi>,
}

impl std::fmt::Debug for StatePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePoller").finish_non_exhaustive()
    }
}

impl StatePoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(api: Arc<dyn PolarDbApi>) -> Self {
        Self { api }
    }

    /// Waits for a cluster to reach one of the target statuses.
    ///
    /// # Errors
    ///
    /// Returns `WaitError::Terminal` on a failure status, `UnexpectedState`
    /// on a status outside the wait, `NotFound` once the tolerated not-found
    /// answers are used up, `Timeout` past the deadline, and any other
    /// describe error unchanged.
    pub async fn wait_for(&self, cluster_id: &str, spec: &WaitSpec) -> Result<ClusterStatus> {
        let started = Instant::now();
        let deadline = started + spec.timeout;

        if !spec.delay.is_zero() {
            debug!(
                "Waiting {:?} before polling cluster {cluster_id}",
                spec.delay
            );
            tokio::time::sleep(spec.delay.min(spec.timeout)).await;
        }

        let mut polls = 0u32;
        let mut missing = 0u32;
        let mut last_status = ClusterStatus::Unknown;

        loop {
            polls += 1;

            match self.api.describe_db_cluster_attribute(cluster_id).await {
                Ok(attribute) => {
                    missing = 0;
                    let status = attribute.status;
                    trace!("Cluster {cluster_id} poll {polls}: {status}");

                    if spec.fail.contains(&status) {
                        return Err(WaitError::Terminal {
                            id: cluster_id.to_string(),
                            status: status.to_string(),
                            polls,
                        }
                        .into());
                    }

                    if spec.target.contains(&status) {
                        info!("Cluster {cluster_id} reached {status} after {polls} poll(s)");
                        return Ok(status);
                    }

                    if !spec.pending.contains(&status) {
                        return Err(WaitError::UnexpectedState {
                            id: cluster_id.to_string(),
                            status: status.to_string(),
                        }
                        .into());
                    }

                    last_status = status;
                }
                Err(e) if e.is_not_found() => {
                    missing += 1;
                    debug!(
                        "Cluster {cluster_id} not visible yet ({missing}/{})",
                        spec.not_found_checks
                    );
                    if missing > spec.not_found_checks {
                        return Err(WaitError::NotFound {
                            id: cluster_id.to_string(),
                            checks: missing,
                        }
                        .into());
                    }
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    id: cluster_id.to_string(),
                    target: spec.target_names(),
                    last_status: last_status.to_string(),
                    polls,
                    waited: now - started,
                }
                .into());
            }

            tokio::time::sleep(spec.poll_interval.min(deadline - now)).await;
        }
    }
}
