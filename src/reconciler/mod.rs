//! Lifecycle management of a single cluster.
//!
//! The [`Reconciler`] drives one cluster through create, read, update and
//! delete. Every transition is recorded on the cluster's [`ResourceRecord`]
//! as it happens, so the identity of a created cluster survives a failed
//! wait or a failed convergence step.

pub mod convergence;
pub mod dirty;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cloud::{
    AttributeReader, ClusterSnapshot, NetworkLookup, PolarDbApi, StatePoller, WaitSpec,
    build_create_request,
};
use crate::config::{ClusterSpec, PayType, WaitSettings};
use crate::error::{ErrorClass, ReconcileError, Result};
use crate::state::{LifecyclePhase, ResourceRecord};

pub use convergence::{ConvergencePlan, ConvergenceStep, PassKind, StepAction, StepRunner};
pub use dirty::{
    DirtyFields, FieldTag, ImmutableChange, check_immutable, compute_dirty, immutable_changes,
};

/// Upper bound on how long transient delete conflicts are retried.
pub const DELETE_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Creates, converges and deletes clusters.
#[derive(Clone)]
pub struct Reconciler {
    /// Control-plane API.
    api: Arc<dyn PolarDbApi>,
    /// Vswitch lookups for create.
    network: Arc<dyn NetworkLookup>,
    /// Region clusters are created in.
    region: String,
    /// Poll intervals and delays.
    waits: WaitSettings,
    poller: StatePoller,
    reader: AttributeReader,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("region", &self.region)
            .field("waits", &self.waits)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler with the default wait settings.
    #[must_use]
    pub fn new(api: Arc<dyn PolarDbApi>, network: Arc<dyn NetworkLookup>, region: &str) -> Self {
        Self {
            poller: StatePoller::new(Arc::clone(&api)),
            reader: AttributeReader::new(Arc::clone(&api)),
            api,
            network,
            region: region.to_string(),
            waits: WaitSettings::default(),
        }
    }

    /// Sets the wait settings.
    #[must_use]
    pub const fn with_wait_settings(mut self, waits: WaitSettings) -> Self {
        self.waits = waits;
        self
    }

    /// Returns the region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Creates a cluster and converges its mutable fields.
    ///
    /// The cluster id is stored on `record` as soon as the create call
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the request cannot be built (no create
    /// call is made), the create error, a `WaitError` if the cluster does
    /// not reach `Running`, or a `ReconcileError` from the convergence pass.
    pub async fn create(&self, spec: &ClusterSpec, record: &mut ResourceRecord) -> Result<usize> {
        let request = build_create_request(spec, &self.region, self.network.as_ref()).await?;

        info!(
            "Creating cluster {} ({} {}, {})",
            spec.name, request.db_type, request.db_version, request.db_node_class
        );
        let response = self.api.create_db_cluster(&request).await?;
        let cluster_id = response.db_cluster_id;

        record.set_identity(&cluster_id);
        record.set_phase(LifecyclePhase::Creating);
        info!("Cluster {} created as {cluster_id}", spec.name);

        self.poller
            .wait_for(
                &cluster_id,
                &WaitSpec::creation(&self.waits, spec.timeouts.create()),
            )
            .await?;

        record.set_phase(LifecyclePhase::Converging);
        self.converge(spec, record, PassKind::Initial).await
    }

    /// Refreshes the snapshot of a tracked cluster.
    ///
    /// Returns `Ok(None)` and clears the identity if the cluster is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if a describe call fails.
    pub async fn read(&self, record: &mut ResourceRecord) -> Result<Option<ClusterSnapshot>> {
        let Some(cluster_id) = record.cluster_id.clone() else {
            return Ok(None);
        };

        match self.reader.refresh(&cluster_id).await? {
            Some(snapshot) => {
                record.snapshot = Some(snapshot.clone());
                Ok(Some(snapshot))
            }
            None => {
                warn!("Cluster {} ({cluster_id}) disappeared", record.name);
                record.clear_identity();
                Ok(None)
            }
        }
    }

    /// Converges the mutable fields of a tracked cluster.
    ///
    /// Returns the number of mutations issued.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ImmutableField` if a creation-only field
    /// changed, `ReconcileError::ResourceGone` if the cluster no longer
    /// exists, and `ReconcileError::StepFailed` for the first failing step.
    pub async fn update(&self, spec: &ClusterSpec, record: &mut ResourceRecord) -> Result<usize> {
        if !record.has_identity() {
            return Err(ReconcileError::Aborted {
                reason: format!("cluster {} has no remote identity", spec.name),
            }
            .into());
        }
        self.converge(spec, record, PassKind::Subsequent).await
    }

    async fn converge(
        &self,
        spec: &ClusterSpec,
        record: &mut ResourceRecord,
        pass: PassKind,
    ) -> Result<usize> {
        let cluster_id = record.cluster_id.clone().unwrap_or_default();

        let Some(snapshot) = self.read(record).await? else {
            return Err(ReconcileError::ResourceGone {
                resource_id: cluster_id,
            }
            .into());
        };

        check_immutable(spec, &snapshot)?;
        if snapshot.pay_type != spec.pay_type {
            warn!(
                "Cluster {cluster_id} is {} but {} is requested; billing mode is not changed after creation",
                snapshot.pay_type, spec.pay_type
            );
        }

        let mut dirty = compute_dirty(spec, &snapshot);
        let plan = ConvergencePlan::build(&cluster_id, spec, &dirty, pass, &self.waits)?;

        if plan.is_empty() {
            debug!("Cluster {cluster_id} already converged");
            record.set_phase(LifecyclePhase::Stable);
            return Ok(0);
        }

        record.set_phase(LifecyclePhase::Converging);
        info!("Cluster {cluster_id}: converging {dirty}");

        let executed = StepRunner::new(self.api.as_ref(), &self.poller)
            .run(&plan, &mut dirty)
            .await?;

        if self.read(record).await?.is_none() {
            return Err(ReconcileError::ResourceGone {
                resource_id: cluster_id,
            }
            .into());
        }
        record.set_phase(LifecyclePhase::Stable);
        info!("Cluster {cluster_id} converged ({executed} change(s))");

        Ok(executed)
    }

    /// Deletes a tracked cluster.
    ///
    /// An absent identity or a cluster that no longer exists counts as
    /// deleted. Transient status conflicts are retried for at most
    /// `timeout` or [`DELETE_RETRY_WINDOW`], whichever is shorter.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::PermanentDeletion` for prepaid clusters
    /// (no delete call is made), `ReconcileError::DeleteTimedOut` when the
    /// retry budget runs out, and any non-retryable remote error.
    pub async fn delete(&self, record: &mut ResourceRecord, timeout: Duration) -> Result<()> {
        let Some(cluster_id) = record.cluster_id.clone() else {
            debug!("Cluster {} has no identity; nothing to delete", record.name);
            return Ok(());
        };

        let attribute = match self.api.describe_db_cluster_attribute(&cluster_id).await {
            Ok(attribute) => attribute,
            Err(e) if e.is_not_found() => {
                info!("Cluster {cluster_id} already deleted");
                record.clear_identity();
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if attribute.pay_type == PayType::Prepaid {
            return Err(ReconcileError::PermanentDeletion {
                resource_id: cluster_id,
            }
            .into());
        }

        let previous = record.phase;
        record.set_phase(LifecyclePhase::Deleting);

        let budget = timeout.min(DELETE_RETRY_WINDOW);
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            info!("Deleting cluster {cluster_id} (attempt {attempts})");

            let Err(e) = self.api.delete_db_cluster(&cluster_id).await else {
                break;
            };

            match e.class() {
                ErrorClass::NotFound => {
                    debug!("Cluster {cluster_id} vanished during delete");
                    break;
                }
                ErrorClass::Retryable => {
                    let waited = started.elapsed();
                    if waited >= budget {
                        record.set_phase(previous);
                        return Err(ReconcileError::DeleteTimedOut {
                            resource_id: cluster_id,
                            attempts,
                            waited,
                            last_error: e.to_string(),
                        }
                        .into());
                    }
                    warn!("Cluster {cluster_id} busy, retrying delete: {e}");
                    tokio::time::sleep(self.waits.poll_interval().min(budget - waited)).await;
                }
                ErrorClass::Fatal => {
                    record.set_phase(previous);
                    return Err(e);
                }
            }
        }

        info!("Cluster {cluster_id} deleted");
        record.clear_identity();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::FakePolarDb;
    use crate::cloud::ClusterStatus;
    use crate::config::ParameterSpec;
    use crate::error::{ConfigError, ProvisionerError, WaitError};
    use std::collections::BTreeSet;

    const BUSY: &str = "OperationDenied.DBClusterStatus";

    fn setup() -> (Arc<FakePolarDb>, Reconciler) {
        let fake = Arc::new(FakePolarDb::new());
        let reconciler = Reconciler::new(fake.clone(), fake.clone(), "cn-hangzhou")
            .with_wait_settings(WaitSettings::immediate());
        (fake, reconciler)
    }

    fn spec() -> ClusterSpec {
        ClusterSpec::new("orders", "MySQL", "8.0", "polar.mysql.x4.large")
    }

    fn tracked(id: &str) -> ResourceRecord {
        let mut record = ResourceRecord::new("orders");
        record.set_identity(id);
        record.set_phase(LifecyclePhase::Stable);
        record
    }

    #[tokio::test]
    async fn test_create_with_defaults_makes_no_convergence_calls() {
        let (fake, reconciler) = setup();
        fake.script_created(vec![ClusterStatus::Creating, ClusterStatus::Running]);
        let mut record = ResourceRecord::new("orders");

        let applied = reconciler
            .create(&spec(), &mut record)
            .await
            .expect("create succeeds");

        assert_eq!(applied, 0);
        assert_eq!(fake.mutations(), vec!["CreateDBCluster"]);
        assert_eq!(record.cluster_id.as_deref(), Some("pc-fake0001"));
        assert_eq!(record.phase, LifecyclePhase::Stable);
        assert!(record.snapshot.as_ref().is_some_and(ClusterSnapshot::is_running));
    }

    #[tokio::test]
    async fn test_create_converges_fields_except_description() {
        let (fake, reconciler) = setup();
        let mut desired = spec();
        desired.description = Some(String::from("orders primary"));
        desired.maintain_time = Some(String::from("18:00Z-19:00Z"));
        desired.security_ips = Some(BTreeSet::from([
            String::from("10.0.0.2"),
            String::from("10.0.0.1"),
        ]));
        let mut record = ResourceRecord::new("orders");

        let applied = reconciler
            .create(&desired, &mut record)
            .await
            .expect("create succeeds");

        assert_eq!(applied, 2);
        assert_eq!(
            fake.mutations(),
            vec![
                "CreateDBCluster",
                "ModifyDBClusterMaintainTime",
                "ModifyDBClusterAccessWhitelist",
            ]
        );
        assert_eq!(fake.security_ips("pc-fake0001"), vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(
            fake.description("pc-fake0001").as_deref(),
            Some("orders primary")
        );
    }

    #[tokio::test]
    async fn test_zone_mismatch_makes_no_create_call() {
        let (fake, reconciler) = setup();
        fake.add_vswitch("vsw-1", "cn-hangzhou-h", "vpc-1");
        let mut desired = spec();
        desired.vswitch_id = Some(String::from("vsw-1"));
        desired.zone_id = Some(String::from("cn-hangzhou-i"));
        let mut record = ResourceRecord::new("orders");

        let err = reconciler
            .create(&desired, &mut record)
            .await
            .expect_err("zone mismatch");

        assert!(matches!(
            err,
            ProvisionerError::Config(ConfigError::ZoneMismatch { .. })
        ));
        assert_eq!(fake.count("CreateDBCluster"), 0);
        assert!(!record.has_identity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_timeout_keeps_identity() {
        let fake = Arc::new(FakePolarDb::new());
        let reconciler = Reconciler::new(fake.clone(), fake.clone(), "cn-hangzhou")
            .with_wait_settings(WaitSettings {
                poll_interval_secs: 10,
                create_delay_secs: 0,
                update_delay_secs: 0,
                not_found_checks: 3,
            });
        fake.script_created(vec![ClusterStatus::Creating]);
        let mut desired = spec();
        desired.timeouts.create_mins = 1;
        let mut record = ResourceRecord::new("orders");

        let err = reconciler
            .create(&desired, &mut record)
            .await
            .expect_err("never reaches running");

        assert!(matches!(err, ProvisionerError::Wait(WaitError::Timeout { .. })));
        assert_eq!(record.cluster_id.as_deref(), Some("pc-fake0001"));
        assert_eq!(record.phase, LifecyclePhase::Creating);
    }

    #[tokio::test]
    async fn test_create_fails_when_cluster_starts_deleting() {
        let (fake, reconciler) = setup();
        fake.script_created(vec![ClusterStatus::Creating, ClusterStatus::Deleting]);
        let mut record = ResourceRecord::new("orders");

        let err = reconciler
            .create(&spec(), &mut record)
            .await
            .expect_err("terminal status");

        assert!(matches!(
            err,
            ProvisionerError::Wait(WaitError::Terminal { polls: 2, .. })
        ));
        assert!(record.has_identity());
    }

    #[tokio::test]
    async fn test_second_update_makes_no_mutations() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        let mut desired = spec();
        desired.description = Some(String::from("orders primary"));
        desired.maintain_time = Some(String::from("18:00Z-19:00Z"));
        desired.parameters = vec![ParameterSpec {
            name: String::from("wait_timeout"),
            value: String::from("600"),
        }];
        let mut record = tracked("pc-1");

        let first = reconciler
            .update(&desired, &mut record)
            .await
            .expect("first update");
        let before = fake.mutations().len();
        let second = reconciler
            .update(&desired, &mut record)
            .await
            .expect("second update");

        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(fake.mutations().len(), before);
        assert_eq!(record.phase, LifecyclePhase::Stable);
    }

    #[tokio::test]
    async fn test_empty_allow_list_sends_localhost() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.modify_db_cluster_access_whitelist("pc-1", "10.0.0.1")
            .await
            .expect("seed allow-list");
        let mut desired = spec();
        desired.security_ips = Some(BTreeSet::new());
        let mut record = tracked("pc-1");

        reconciler
            .update(&desired, &mut record)
            .await
            .expect("update succeeds");

        assert_eq!(
            fake.requests("ModifyDBClusterAccessWhitelist").last().map(String::as_str),
            Some("127.0.0.1")
        );
        assert_eq!(fake.security_ips("pc-1"), vec!["127.0.0.1"]);
    }

    #[tokio::test]
    async fn test_update_rejects_immutable_change() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        let mut desired = spec();
        desired.db_version = String::from("5.7");
        desired.description = Some(String::from("renamed"));
        let mut record = tracked("pc-1");

        let err = reconciler
            .update(&desired, &mut record)
            .await
            .expect_err("immutable change");

        assert!(matches!(
            err,
            ProvisionerError::Config(ConfigError::ImmutableField { ref field, .. })
                if field == "db_version"
        ));
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_vanished_cluster_clears_identity() {
        let (_fake, reconciler) = setup();
        let mut record = tracked("pc-gone");

        let err = reconciler
            .update(&spec(), &mut record)
            .await
            .expect_err("cluster is gone");

        assert!(matches!(
            err,
            ProvisionerError::Reconcile(ReconcileError::ResourceGone { .. })
        ));
        assert!(!record.has_identity());
        assert_eq!(record.phase, LifecyclePhase::NotExists);
    }

    #[tokio::test]
    async fn test_update_failure_names_step() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.fail_action("ModifyDBClusterDescription", "InvalidDBClusterDescription.Format");
        let mut desired = spec();
        desired.description = Some(String::from("orders primary"));
        desired.security_ips = Some(BTreeSet::from([String::from("10.0.0.1")]));
        let mut record = tracked("pc-1");

        let err = reconciler
            .update(&desired, &mut record)
            .await
            .expect_err("description fails");

        assert!(err.to_string().contains("description"));
        assert_eq!(fake.count("ModifyDBClusterAccessWhitelist"), 0);
        assert!(record.has_identity());
    }

    #[tokio::test]
    async fn test_delete_prepaid_is_refused() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Prepaid);
        let mut record = tracked("pc-1");

        let err = reconciler
            .delete(&mut record, Duration::from_secs(60))
            .await
            .expect_err("prepaid cannot be deleted");

        assert!(matches!(
            err,
            ProvisionerError::Reconcile(ReconcileError::PermanentDeletion { .. })
        ));
        assert_eq!(fake.count("DeleteDBCluster"), 0);
        assert!(record.has_identity());
    }

    #[tokio::test]
    async fn test_delete_absent_cluster_succeeds() {
        let (fake, reconciler) = setup();
        let mut record = tracked("pc-gone");

        reconciler
            .delete(&mut record, Duration::from_secs(60))
            .await
            .expect("absent counts as deleted");

        assert!(!record.has_identity());
        assert_eq!(fake.count("DeleteDBCluster"), 0);

        let mut untracked = ResourceRecord::new("orders");
        reconciler
            .delete(&mut untracked, Duration::from_secs(60))
            .await
            .expect("no identity counts as deleted");
    }

    #[tokio::test]
    async fn test_delete_retries_busy_cluster() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.fail_deletes_with(&[BUSY, BUSY]);
        let mut record = tracked("pc-1");

        reconciler
            .delete(&mut record, Duration::from_secs(60))
            .await
            .expect("delete succeeds after retries");

        assert_eq!(fake.count("DeleteDBCluster"), 3);
        assert!(!fake.exists("pc-1"));
        assert!(!record.has_identity());
    }

    #[tokio::test]
    async fn test_delete_not_found_during_retry_succeeds() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.fail_deletes_with(&[BUSY, "InvalidDBClusterId.NotFound"]);
        let mut record = tracked("pc-1");

        reconciler
            .delete(&mut record, Duration::from_secs(60))
            .await
            .expect("not found counts as deleted");

        assert_eq!(fake.count("DeleteDBCluster"), 2);
        assert!(!record.has_identity());
    }

    #[tokio::test]
    async fn test_delete_fatal_error_aborts() {
        let (fake, reconciler) = setup();
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.fail_deletes_with(&["Forbidden.RAM"]);
        let mut record = tracked("pc-1");

        let err = reconciler
            .delete(&mut record, Duration::from_secs(60))
            .await
            .expect_err("fatal error");

        assert_eq!(err.remote_code(), Some("Forbidden.RAM"));
        assert_eq!(fake.count("DeleteDBCluster"), 1);
        assert_eq!(record.phase, LifecyclePhase::Stable);
        assert!(fake.exists("pc-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_gives_up_after_budget() {
        let fake = Arc::new(FakePolarDb::new());
        let reconciler = Reconciler::new(fake.clone(), fake.clone(), "cn-hangzhou")
            .with_wait_settings(WaitSettings {
                poll_interval_secs: 10,
                create_delay_secs: 0,
                update_delay_secs: 0,
                not_found_checks: 3,
            });
        fake.seed_cluster("pc-1", PayType::Postpaid);
        fake.fail_deletes_with(&[BUSY; 10]);
        let mut record = tracked("pc-1");

        let err = reconciler
            .delete(&mut record, Duration::from_secs(30))
            .await
            .expect_err("budget runs out");

        let ProvisionerError::Reconcile(ReconcileError::DeleteTimedOut { attempts, .. }) = &err
        else {
            panic!("expected DeleteTimedOut, got {err}");
        };
        assert!(*attempts >= 3);
        assert_eq!(fake.count("DeleteDBCluster"), *attempts as usize);
        assert!(record.has_identity());
    }
}
