//! Scripted in-memory control plane for tests.
//!
//! [`FakePolarDb`] keeps clusters in memory, applies mutations to them and
//! records every call by action name. Status scripts make describe calls
//! walk through a sequence of statuses, repeating the last one.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::{PayType, RenewalStatus};
use crate::error::{CloudApiError, ProvisionerError, Result};

use super::client::{NetworkLookup, PolarDbApi};
use super::types::{
    AutoRenewAttribute, ClusterParameter, ClusterStatus, ClusterSummary, CreateDbClusterRequest,
    CreateDbClusterResponse, DbClusterAttribute, DbClusterPage, DbNode,
    DescribeDbClustersRequest, ModifyAutoRenewRequest, ModifyParametersRequest, VSwitch,
};

const NOT_FOUND: &str = "InvalidDBClusterId.NotFound";

#[derive(Debug, Clone)]
struct FakeCluster {
    attribute: DbClusterAttribute,
    script: VecDeque<ClusterStatus>,
    security_ips: Vec<String>,
    parameters: BTreeMap<String, String>,
    renewal: Option<AutoRenewAttribute>,
}

#[derive(Debug, Default)]
struct FakeState {
    clusters: BTreeMap<String, FakeCluster>,
    calls: Vec<String>,
    requests: Vec<(String, String)>,
    next_id: u32,
    hidden_describes: u32,
    created_script: Vec<ClusterStatus>,
    delete_errors: VecDeque<String>,
    failing: HashMap<String, String>,
    vswitches: HashMap<String, VSwitch>,
}

/// In-memory control plane.
#[derive(Debug, Default)]
pub struct FakePolarDb {
    state: Mutex<FakeState>,
}

fn api_error(action: &str, code: &str) -> ProvisionerError {
    CloudApiError::api(action, code, format!("{action} rejected with {code}"), "fake-request").into()
}

impl FakeCluster {
    fn new(id: &str, pay_type: PayType) -> Self {
        Self {
            attribute: DbClusterAttribute {
                id: id.to_string(),
                status: ClusterStatus::Running,
                pay_type,
                db_type: String::from("MySQL"),
                db_version: String::from("8.0"),
                region_id: String::from("cn-hangzhou"),
                nodes: vec![DbNode {
                    id: format!("pi-{id}"),
                    role: String::from("Writer"),
                    class: String::from("polar.mysql.x4.large"),
                    ..DbNode::default()
                }],
                ..DbClusterAttribute::default()
            },
            script: VecDeque::new(),
            security_ips: vec![String::from("127.0.0.1")],
            parameters: BTreeMap::new(),
            renewal: Some(AutoRenewAttribute {
                db_cluster_id: id.to_string(),
                ..AutoRenewAttribute::default()
            }),
        }
    }

    fn renewal_mut(&mut self) -> &mut AutoRenewAttribute {
        let id = self.attribute.id.clone();
        self.renewal.get_or_insert_with(|| AutoRenewAttribute {
            db_cluster_id: id,
            ..AutoRenewAttribute::default()
        })
    }

    fn next_status(&mut self) -> ClusterStatus {
        if self.script.len() > 1 {
            if let Some(status) = self.script.pop_front() {
                self.attribute.status = status;
            }
        } else if let Some(status) = self.script.front() {
            self.attribute.status = status.clone();
        }
        self.attribute.status.clone()
    }
}

impl FakePolarDb {
    /// Creates an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("fake state lock");
        f(&mut state)
    }

    /// Adds an existing `Running` cluster.
    pub fn seed_cluster(&self, id: &str, pay_type: PayType) {
        self.with_state(|s| {
            s.clusters.insert(id.to_string(), FakeCluster::new(id, pay_type));
        });
    }

    /// Makes describe calls on `id` walk through `script`.
    pub fn script_status(&self, id: &str, script: Vec<ClusterStatus>) {
        self.with_state(|s| {
            if let Some(cluster) = s.clusters.get_mut(id) {
                cluster.script = script.into();
            }
        });
    }

    /// Status script given to clusters created from now on.
    pub fn script_created(&self, script: Vec<ClusterStatus>) {
        self.with_state(|s| s.created_script = script);
    }

    /// The next `count` describe calls answer not-found.
    pub fn hide_describes(&self, count: u32) {
        self.with_state(|s| s.hidden_describes = count);
    }

    /// The next delete calls fail with these codes, in order.
    pub fn fail_deletes_with(&self, codes: &[&str]) {
        self.with_state(|s| s.delete_errors = codes.iter().map(|c| (*c).to_string()).collect());
    }

    /// Every call to `action` fails with `code`.
    pub fn fail_action(&self, action: &str, code: &str) {
        self.with_state(|s| {
            s.failing.insert(action.to_string(), code.to_string());
        });
    }

    /// Registers a vswitch.
    pub fn add_vswitch(&self, id: &str, zone_id: &str, vpc_id: &str) {
        self.with_state(|s| {
            s.vswitches.insert(
                id.to_string(),
                VSwitch {
                    v_switch_id: id.to_string(),
                    zone_id: zone_id.to_string(),
                    vpc_id: vpc_id.to_string(),
                },
            );
        });
    }

    /// Sets the description of a cluster.
    pub fn set_description(&self, id: &str, description: &str) {
        self.with_state(|s| {
            if let Some(cluster) = s.clusters.get_mut(id) {
                cluster.attribute.description = description.to_string();
            }
        });
    }

    /// Sets the renewal attribute of a cluster.
    pub fn set_renewal(&self, id: &str, renewal: AutoRenewAttribute) {
        self.with_state(|s| {
            if let Some(cluster) = s.clusters.get_mut(id) {
                cluster.renewal = Some(renewal);
            }
        });
    }

    /// Makes the renewal describe return an empty list.
    pub fn clear_renewal(&self, id: &str) {
        self.with_state(|s| {
            if let Some(cluster) = s.clusters.get_mut(id) {
                cluster.renewal = None;
            }
        });
    }

    /// Sets the engine class of a cluster.
    pub fn set_node_class(&self, id: &str, class: &str) {
        self.with_state(|s| {
            if let Some(cluster) = s.clusters.get_mut(id) {
                for node in &mut cluster.attribute.nodes {
                    node.class = class.to_string();
                }
            }
        });
    }

    /// Removes a cluster as if it was released out of band.
    pub fn forget(&self, id: &str) {
        self.with_state(|s| {
            s.clusters.remove(id);
        });
    }

    /// Every call, by action name, in order.
    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    /// Number of calls to `action`.
    pub fn count(&self, action: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| *c == action).count())
    }

    /// Calls that change remote state.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("Create") || c.starts_with("Modify") || c.starts_with("Delete")
            })
            .collect()
    }

    /// Serialized arguments of the calls to `action`.
    pub fn requests(&self, action: &str) -> Vec<String> {
        self.with_state(|s| {
            s.requests
                .iter()
                .filter(|(a, _)| a == action)
                .map(|(_, body)| body.clone())
                .collect()
        })
    }

    /// Whether a cluster exists.
    pub fn exists(&self, id: &str) -> bool {
        self.with_state(|s| s.clusters.contains_key(id))
    }

    /// Current allow-list of a cluster.
    pub fn security_ips(&self, id: &str) -> Vec<String> {
        self.with_state(|s| {
            s.clusters
                .get(id)
                .map(|c| c.security_ips.clone())
                .unwrap_or_default()
        })
    }

    /// Current description of a cluster.
    pub fn description(&self, id: &str) -> Option<String> {
        self.with_state(|s| s.clusters.get(id).map(|c| c.attribute.description.clone()))
    }

    /// Records a call and fails it if it is scripted to fail.
    fn record(&self, action: &str, body: String) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(action.to_string());
            s.requests.push((action.to_string(), body));
            match s.failing.get(action) {
                Some(code) => Err(api_error(action, code)),
                None => Ok(()),
            }
        })
    }

    /// Applies `f` to an existing cluster.
    fn modify<R>(
        &self,
        action: &str,
        id: &str,
        f: impl FnOnce(&mut FakeCluster) -> R,
    ) -> Result<R> {
        self.with_state(|s| match s.clusters.get_mut(id) {
            Some(cluster) => Ok(f(cluster)),
            None => Err(api_error(action, NOT_FOUND)),
        })
    }
}

#[async_trait]
impl PolarDbApi for FakePolarDb {
    async fn create_db_cluster(
        &self,
        request: &CreateDbClusterRequest,
    ) -> Result<CreateDbClusterResponse> {
        let action = "CreateDBCluster";
        self.record(action, serde_json::to_string(request).unwrap_or_default())?;

        self.with_state(|s| {
            s.next_id += 1;
            let id = format!("pc-fake{:04}", s.next_id);
            let mut cluster = FakeCluster::new(&id, request.pay_type);
            cluster.attribute.status = ClusterStatus::Creating;
            cluster.attribute.db_type.clone_from(&request.db_type);
            cluster.attribute.db_version.clone_from(&request.db_version);
            cluster.attribute.vswitch_id = request.vswitch_id.clone().unwrap_or_default();
            cluster.attribute.vpc_id = request.vpc_id.clone().unwrap_or_default();
            cluster.attribute.zone_ids = request.zone_id.clone().unwrap_or_default();
            cluster.attribute.description = request.description.clone().unwrap_or_default();
            for node in &mut cluster.attribute.nodes {
                node.class.clone_from(&request.db_node_class);
            }
            cluster.script = if s.created_script.is_empty() {
                VecDeque::from([ClusterStatus::Running])
            } else {
                s.created_script.clone().into()
            };
            if request.auto_renew == Some(true) {
                let renewal = cluster.renewal_mut();
                renewal.auto_renew_enabled = true;
                renewal.renewal_status = RenewalStatus::AutoRenewal;
            }
            s.clusters.insert(id.clone(), cluster);

            Ok(CreateDbClusterResponse {
                db_cluster_id: id,
                order_id: String::new(),
                request_id: String::from("fake-request"),
            })
        })
    }

    async fn describe_db_cluster_attribute(&self, cluster_id: &str) -> Result<DbClusterAttribute> {
        let action = "DescribeDBClusterAttribute";
        self.record(action, cluster_id.to_string())?;

        self.with_state(|s| {
            if s.hidden_describes > 0 {
                s.hidden_describes -= 1;
                return Err(api_error(action, NOT_FOUND));
            }
            match s.clusters.get_mut(cluster_id) {
                Some(cluster) => {
                    cluster.next_status();
                    Ok(cluster.attribute.clone())
                }
                None => Err(api_error(action, NOT_FOUND)),
            }
        })
    }

    async fn describe_db_clusters(
        &self,
        request: &DescribeDbClustersRequest,
    ) -> Result<DbClusterPage> {
        self.record("DescribeDBClusters", request.page_number.to_string())?;

        self.with_state(|s| {
            let ids: Option<Vec<&str>> = request
                .db_cluster_ids
                .as_deref()
                .map(|ids| ids.split(',').collect());
            let matching: Vec<ClusterSummary> = s
                .clusters
                .values()
                .map(|c| &c.attribute)
                .filter(|a| ids.as_ref().is_none_or(|ids| ids.contains(&a.id.as_str())))
                .filter(|a| request.status.as_deref().is_none_or(|st| a.status.as_str() == st))
                .filter(|a| request.db_type.as_deref().is_none_or(|t| a.db_type == t))
                .filter(|a| request.description.as_deref().is_none_or(|d| a.description == d))
                .map(|a| ClusterSummary {
                    id: a.id.clone(),
                    description: a.description.clone(),
                    status: a.status.clone(),
                    db_type: a.db_type.clone(),
                    db_version: a.db_version.clone(),
                    pay_type: a.pay_type,
                    region_id: a.region_id.clone(),
                    nodes: a.nodes.clone(),
                    ..ClusterSummary::default()
                })
                .collect();

            let size = request.page_size as usize;
            let skip = (request.page_number.saturating_sub(1) as usize) * size;
            Ok(DbClusterPage {
                total_record_count: u32::try_from(matching.len()).unwrap_or(u32::MAX),
                page_number: request.page_number,
                items: matching.into_iter().skip(skip).take(size).collect(),
            })
        })
    }

    async fn delete_db_cluster(&self, cluster_id: &str) -> Result<()> {
        let action = "DeleteDBCluster";
        self.record(action, cluster_id.to_string())?;

        self.with_state(|s| {
            if let Some(code) = s.delete_errors.pop_front() {
                return Err(api_error(action, &code));
            }
            match s.clusters.remove(cluster_id) {
                Some(_) => Ok(()),
                None => Err(api_error(action, NOT_FOUND)),
            }
        })
    }

    async fn modify_db_cluster_parameters(&self, request: &ModifyParametersRequest) -> Result<()> {
        let action = "ModifyDBClusterParameters";
        self.record(action, serde_json::to_string(request).unwrap_or_default())?;
        self.modify(action, &request.db_cluster_id, |c| {
            c.parameters.extend(request.parameters.clone());
        })
    }

    async fn describe_db_cluster_parameters(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ClusterParameter>> {
        let action = "DescribeDBClusterParameters";
        self.record(action, cluster_id.to_string())?;
        self.modify(action, cluster_id, |c| {
            c.parameters
                .iter()
                .map(|(name, value)| ClusterParameter {
                    parameter_name: name.clone(),
                    parameter_value: value.clone(),
                })
                .collect()
        })
    }

    async fn modify_auto_renew_attribute(&self, request: &ModifyAutoRenewRequest) -> Result<()> {
        let action = "ModifyAutoRenewAttribute";
        self.record(action, serde_json::to_string(request).unwrap_or_default())?;
        self.modify(action, &request.db_cluster_id, |c| {
            let renewal = c.renewal_mut();
            renewal.renewal_status = request.renewal_status;
            renewal.auto_renew_enabled = request.renewal_status == RenewalStatus::AutoRenewal;
            if let (Some(duration), Some(unit)) = (request.duration, request.period_unit) {
                renewal.duration = duration;
                renewal.period_unit = unit;
            }
        })
    }

    async fn describe_auto_renew_attribute(
        &self,
        cluster_id: &str,
    ) -> Result<Option<AutoRenewAttribute>> {
        let action = "DescribeAutoRenewAttribute";
        self.record(action, cluster_id.to_string())?;
        self.modify(action, cluster_id, |c| c.renewal.clone())
    }

    async fn modify_db_cluster_maintain_time(
        &self,
        cluster_id: &str,
        maintain_time: &str,
    ) -> Result<()> {
        let action = "ModifyDBClusterMaintainTime";
        self.record(action, maintain_time.to_string())?;
        self.modify(action, cluster_id, |c| {
            c.attribute.maintain_time = maintain_time.to_string();
        })
    }

    async fn modify_db_cluster_description(
        &self,
        cluster_id: &str,
        description: &str,
    ) -> Result<()> {
        let action = "ModifyDBClusterDescription";
        self.record(action, description.to_string())?;
        self.modify(action, cluster_id, |c| {
            c.attribute.description = description.to_string();
        })
    }

    async fn modify_db_cluster_access_whitelist(
        &self,
        cluster_id: &str,
        security_ips: &str,
    ) -> Result<()> {
        let action = "ModifyDBClusterAccessWhitelist";
        self.record(action, security_ips.to_string())?;
        self.modify(action, cluster_id, |c| {
            c.security_ips = security_ips.split(',').map(String::from).collect();
        })
    }

    async fn describe_db_cluster_access_whitelist(&self, cluster_id: &str) -> Result<Vec<String>> {
        let action = "DescribeDBClusterAccessWhitelist";
        self.record(action, cluster_id.to_string())?;
        self.modify(action, cluster_id, |c| c.security_ips.clone())
    }
}

#[async_trait]
impl NetworkLookup for FakePolarDb {
    async fn describe_vswitch(&self, vswitch_id: &str) -> Result<VSwitch> {
        let action = "DescribeVSwitchAttributes";
        self.record(action, vswitch_id.to_string())?;
        self.with_state(|s| {
            s.vswitches
                .get(vswitch_id)
                .cloned()
                .ok_or_else(|| api_error(action, "InvalidVSwitchId.NotFound"))
        })
    }
}
