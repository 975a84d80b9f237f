//! PolarDB control-plane types and data structures.
//!
//! Wire types mirror the control-plane JSON (PascalCase keys); the
//! [`ClusterSnapshot`] is the assembled view the reconciler works with.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{EffectiveTime, PayType, RenewalStatus};
use crate::error::{ConfigError, Result};

/// Maximum length of an idempotency token accepted by the control plane.
pub const CLIENT_TOKEN_MAX_LEN: usize = 64;

/// Lifecycle status reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum ClusterStatus {
    /// Being provisioned.
    Creating,
    /// Serving traffic.
    Running,
    /// Being released.
    Deleting,
    /// Restarting.
    Rebooting,
    /// Node class change in progress.
    ClassChanging,
    /// Maintenance in progress.
    Maintaining,
    /// Any other status string.
    Other(String),
    /// Not reported.
    #[default]
    Unknown,
}

impl ClusterStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "Creating",
            Self::Running => "Running",
            Self::Deleting => "Deleting",
            Self::Rebooting => "Rebooting",
            Self::ClassChanging => "ClassChanging",
            Self::Maintaining => "Maintaining",
            Self::Other(s) => s.as_str(),
            Self::Unknown => "Unknown",
        }
    }
}

impl From<&str> for ClusterStatus {
    fn from(s: &str) -> Self {
        match s {
            "Creating" => Self::Creating,
            "Running" => Self::Running,
            "Deleting" => Self::Deleting,
            "Rebooting" => Self::Rebooting,
            "ClassChanging" => Self::ClassChanging,
            "Maintaining" => Self::Maintaining,
            "" | "Unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ClusterStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ClusterStatus> for String {
    fn from(status: ClusterStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of a purchase or renewal duration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum PeriodUnit {
    /// Months.
    #[default]
    Month,
    /// Years.
    Year,
}

impl PeriodUnit {
    /// Splits a duration in months into the value and unit the control plane expects.
    ///
    /// Up to 9 months are sent as months; longer durations are sent as whole years.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPeriod` for zero, or for durations above
    /// 9 months that are not a multiple of 12.
    pub fn split_months(months: u32) -> Result<(u32, Self)> {
        match months {
            0 => Err(ConfigError::InvalidPeriod { months }.into()),
            1..=9 => Ok((months, Self::Month)),
            m if m % 12 == 0 => Ok((m / 12, Self::Year)),
            _ => Err(ConfigError::InvalidPeriod { months }.into()),
        }
    }

    /// Converts a value in this unit back to months.
    #[must_use]
    pub const fn to_months(self, value: u32) -> u32 {
        match self {
            Self::Month => value,
            Self::Year => value.saturating_mul(12),
        }
    }
}

impl std::fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Month => "Month",
            Self::Year => "Year",
        };
        write!(f, "{s}")
    }
}

/// A node of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DbNode {
    /// Node id.
    #[serde(rename = "DBNodeId")]
    pub id: String,
    /// `Writer` or `Reader`.
    #[serde(rename = "DBNodeRole", default)]
    pub role: String,
    /// Node class.
    #[serde(rename = "DBNodeClass", default)]
    pub class: String,
    /// Maximum connections.
    #[serde(rename = "MaxConnections", default)]
    pub max_connections: u32,
    /// Maximum IOPS.
    #[serde(rename = "MaxIOPS", default)]
    pub max_iops: u32,
    /// Zone of the node.
    #[serde(rename = "ZoneId", default)]
    pub zone_id: String,
    /// Region of the node.
    #[serde(rename = "RegionId", default)]
    pub region_id: String,
    /// Node status.
    #[serde(rename = "DBNodeStatus", default)]
    pub status: String,
    /// Creation time as reported.
    #[serde(rename = "CreationTime", default)]
    pub creation_time: String,
}

/// Body of `DescribeDBClusterAttribute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DbClusterAttribute {
    /// Cluster id.
    #[serde(rename = "DBClusterId")]
    pub id: String,
    /// Lifecycle status.
    #[serde(rename = "DBClusterStatus", default)]
    pub status: ClusterStatus,
    /// Billing mode.
    #[serde(rename = "PayType", default)]
    pub pay_type: PayType,
    /// Engine.
    #[serde(rename = "DBType", default)]
    pub db_type: String,
    /// Engine version.
    #[serde(rename = "DBVersion", default)]
    pub db_version: String,
    /// Region.
    #[serde(rename = "RegionId", default)]
    pub region_id: String,
    /// Zones the cluster spans, comma separated.
    #[serde(rename = "ZoneIds", default)]
    pub zone_ids: String,
    /// VPC.
    #[serde(rename = "VPCId", default)]
    pub vpc_id: String,
    /// Vswitch.
    #[serde(rename = "VSwitchId", default)]
    pub vswitch_id: String,
    /// Network type.
    #[serde(rename = "DBClusterNetworkType", default)]
    pub network_type: String,
    /// Display name.
    #[serde(rename = "DBClusterDescription", default)]
    pub description: String,
    /// Maintenance window.
    #[serde(rename = "MaintainTime", default)]
    pub maintain_time: String,
    /// Creation time.
    #[serde(rename = "CreationTime", default)]
    pub creation_time: String,
    /// Expiry time of a prepaid cluster.
    #[serde(rename = "ExpireTime", default)]
    pub expire_time: String,
    /// Nodes, writer first.
    #[serde(rename = "DBNodes", default)]
    pub nodes: Vec<DbNode>,
}

/// A vswitch as returned by the network lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct VSwitch {
    /// Vswitch id.
    pub v_switch_id: String,
    /// Zone the vswitch lives in.
    pub zone_id: String,
    /// Parent VPC.
    pub vpc_id: String,
}

/// Body of `DescribeAutoRenewAttribute` for one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct AutoRenewAttribute {
    /// Cluster id.
    #[serde(rename = "DBClusterId", default)]
    pub db_cluster_id: String,
    /// Whether automatic renewal is on.
    #[serde(default)]
    pub auto_renew_enabled: bool,
    /// Renewal status.
    #[serde(default)]
    pub renewal_status: RenewalStatus,
    /// Renewal duration in `period_unit`.
    #[serde(default)]
    pub duration: u32,
    /// Unit of `duration`.
    #[serde(default)]
    pub period_unit: PeriodUnit,
}

/// A single engine parameter as reported by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterParameter {
    /// Parameter name.
    pub parameter_name: String,
    /// Current value.
    #[serde(default)]
    pub parameter_value: String,
}

/// Request for `CreateDBCluster`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateDbClusterRequest {
    /// Region.
    #[serde(rename = "RegionId")]
    pub region_id: String,
    /// Engine.
    #[serde(rename = "DBType")]
    pub db_type: String,
    /// Engine version.
    #[serde(rename = "DBVersion")]
    pub db_version: String,
    /// Node class.
    #[serde(rename = "DBNodeClass")]
    pub db_node_class: String,
    /// Billing mode.
    #[serde(rename = "PayType")]
    pub pay_type: PayType,
    /// Display name.
    #[serde(rename = "DBClusterDescription", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Idempotency token.
    #[serde(rename = "ClientToken")]
    pub client_token: String,
    /// Zone or multi-zone token.
    #[serde(rename = "ZoneId", skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// Vswitch.
    #[serde(rename = "VSwitchId", skip_serializing_if = "Option::is_none")]
    pub vswitch_id: Option<String>,
    /// VPC of the vswitch.
    #[serde(rename = "VPCId", skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// Network type, `VPC` when a vswitch is set.
    #[serde(rename = "ClusterNetworkType", skip_serializing_if = "Option::is_none")]
    pub cluster_network_type: Option<String>,
    /// Purchase duration (prepaid only).
    #[serde(rename = "UsedTime", skip_serializing_if = "Option::is_none")]
    pub used_time: Option<u32>,
    /// Unit of `used_time` (prepaid only).
    #[serde(rename = "Period", skip_serializing_if = "Option::is_none")]
    pub period: Option<PeriodUnit>,
    /// Renew the purchase automatically (prepaid only).
    #[serde(rename = "AutoRenew", skip_serializing_if = "Option::is_none")]
    pub auto_renew: Option<bool>,
}

/// Response of `CreateDBCluster`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CreateDbClusterResponse {
    /// Id of the new cluster.
    #[serde(rename = "DBClusterId")]
    pub db_cluster_id: String,
    /// Order id (prepaid).
    #[serde(default)]
    pub order_id: String,
    /// Request id.
    #[serde(default)]
    pub request_id: String,
}

/// Request for `ModifyAutoRenewAttribute`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModifyAutoRenewRequest {
    /// Cluster id.
    #[serde(rename = "DBClusterIds")]
    pub db_cluster_id: String,
    /// New renewal status.
    #[serde(rename = "RenewalStatus")]
    pub renewal_status: RenewalStatus,
    /// Renewal duration (only with `AutoRenewal`).
    #[serde(rename = "Duration", skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    /// Unit of `duration` (only with `AutoRenewal`).
    #[serde(rename = "PeriodUnit", skip_serializing_if = "Option::is_none")]
    pub period_unit: Option<PeriodUnit>,
}

/// Request for `ModifyDBClusterParameters`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModifyParametersRequest {
    /// Cluster id.
    #[serde(rename = "DBClusterId")]
    pub db_cluster_id: String,
    /// Parameters to set, by name.
    #[serde(rename = "Parameters")]
    pub parameters: BTreeMap<String, String>,
    /// When the change takes effect.
    #[serde(rename = "EffectiveTime")]
    pub effective_time: EffectiveTime,
}

/// Request for `DescribeDBClusters`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct DescribeDbClustersRequest {
    /// Comma-separated ids to restrict to.
    #[serde(rename = "DBClusterIds", skip_serializing_if = "Option::is_none")]
    pub db_cluster_ids: Option<String>,
    /// Description filter.
    #[serde(rename = "DBClusterDescription", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Status filter.
    #[serde(rename = "DBClusterStatus", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Engine filter.
    #[serde(rename = "DBType", skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    /// Page size.
    #[serde(rename = "PageSize")]
    pub page_size: u32,
    /// 1-based page number.
    #[serde(rename = "PageNumber")]
    pub page_number: u32,
}

/// One row of `DescribeDBClusters`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClusterSummary {
    /// Cluster id.
    #[serde(rename = "DBClusterId")]
    pub id: String,
    /// Display name.
    #[serde(rename = "DBClusterDescription", default)]
    pub description: String,
    /// Lifecycle status.
    #[serde(rename = "DBClusterStatus", default)]
    pub status: ClusterStatus,
    /// Engine.
    #[serde(rename = "DBType", default)]
    pub db_type: String,
    /// Engine version.
    #[serde(rename = "DBVersion", default)]
    pub db_version: String,
    /// Billing mode.
    #[serde(rename = "PayType", default)]
    pub pay_type: PayType,
    /// Region.
    #[serde(rename = "RegionId", default)]
    pub region_id: String,
    /// Zone.
    #[serde(rename = "ZoneId", default)]
    pub zone_id: String,
    /// VPC.
    #[serde(rename = "VpcId", default)]
    pub vpc_id: String,
    /// Network type.
    #[serde(rename = "DBClusterNetworkType", default)]
    pub network_type: String,
    /// Creation time.
    #[serde(rename = "CreateTime", default)]
    pub create_time: String,
    /// Expiry time.
    #[serde(rename = "ExpireTime", default)]
    pub expire_time: String,
    /// Nodes.
    #[serde(rename = "DBNodes", default)]
    pub nodes: Vec<DbNode>,
}

/// One page of `DescribeDBClusters`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DbClusterPage {
    /// Total number of matching clusters.
    #[serde(default)]
    pub total_record_count: u32,
    /// Page number.
    #[serde(default)]
    pub page_number: u32,
    /// Rows of this page.
    #[serde(default)]
    pub items: Vec<ClusterSummary>,
}

/// Renewal settings observed on a prepaid cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenewalInfo {
    /// Whether automatic renewal is on.
    pub auto_renew_enabled: bool,
    /// Renewal status.
    pub status: RenewalStatus,
    /// Renewal duration in months.
    pub duration_months: u32,
}

/// Observed state of a cluster, assembled from several describe calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSnapshot {
    /// Cluster id.
    pub id: String,
    /// Lifecycle status.
    pub status: ClusterStatus,
    /// Billing mode.
    pub pay_type: PayType,
    /// Engine.
    pub db_type: String,
    /// Engine version.
    pub db_version: String,
    /// Node class of the writer node.
    pub db_node_class: String,
    /// Zones, comma separated.
    pub zone_ids: String,
    /// VPC.
    pub vpc_id: String,
    /// Vswitch.
    pub vswitch_id: String,
    /// Display name.
    pub description: String,
    /// Maintenance window.
    pub maintain_time: String,
    /// Expiry time of a prepaid cluster.
    #[serde(default)]
    pub expire_time: String,
    /// Nodes in the order reported.
    pub nodes: Vec<DbNode>,
    /// Literal remote allow-list.
    pub security_ips: BTreeSet<String>,
    /// Engine parameters by name.
    pub parameters: BTreeMap<String, String>,
    /// Renewal settings (prepaid only).
    pub renewal: Option<RenewalInfo>,
}

impl ClusterSnapshot {
    /// Builds a snapshot from a describe body, before the secondary reads.
    #[must_use]
    pub fn from_attribute(attribute: DbClusterAttribute) -> Self {
        let db_node_class = attribute
            .nodes
            .iter()
            .find(|n| n.role == "Writer")
            .or_else(|| attribute.nodes.first())
            .map(|n| n.class.clone())
            .unwrap_or_default();

        Self {
            id: attribute.id,
            status: attribute.status,
            pay_type: attribute.pay_type,
            db_type: attribute.db_type,
            db_version: attribute.db_version,
            db_node_class,
            zone_ids: attribute.zone_ids,
            vpc_id: attribute.vpc_id,
            vswitch_id: attribute.vswitch_id,
            description: attribute.description,
            maintain_time: attribute.maintain_time,
            expire_time: attribute.expire_time,
            nodes: attribute.nodes,
            security_ips: BTreeSet::new(),
            parameters: BTreeMap::new(),
            renewal: None,
        }
    }

    /// Returns true if the cluster is serving.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ClusterStatus::Running
    }
}

/// Builds an idempotency token for a remote action.
///
/// The token embeds the action, the current unix time and a random UUID,
/// and never exceeds [`CLIENT_TOKEN_MAX_LEN`] characters.
#[must_use]
pub fn build_client_token(action: &str) -> String {
    let mut token = format!(
        "polarctl-{action}-{}-{}",
        chrono::Utc::now().timestamp(),
        uuid::Uuid::new_v4().simple()
    );
    token.truncate(CLIENT_TOKEN_MAX_LEN);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_months_short_terms() {
        for months in 1..=9 {
            let (value, unit) = PeriodUnit::split_months(months).expect("short term");
            assert_eq!(value, months);
            assert_eq!(unit, PeriodUnit::Month);
        }
    }

    #[test]
    fn test_split_months_whole_years() {
        assert_eq!(
            PeriodUnit::split_months(12).expect("one year"),
            (1, PeriodUnit::Year)
        );
        assert_eq!(
            PeriodUnit::split_months(24).expect("two years"),
            (2, PeriodUnit::Year)
        );
        assert_eq!(
            PeriodUnit::split_months(36).expect("three years"),
            (3, PeriodUnit::Year)
        );
    }

    #[test]
    fn test_split_months_rejects_partial_years() {
        assert!(PeriodUnit::split_months(0).is_err());
        assert!(PeriodUnit::split_months(10).is_err());
        assert!(PeriodUnit::split_months(18).is_err());
    }

    #[test]
    fn test_period_unit_to_months() {
        assert_eq!(PeriodUnit::Month.to_months(6), 6);
        assert_eq!(PeriodUnit::Year.to_months(2), 24);
    }

    #[test]
    fn test_cluster_status_round_trip_unknown_value() {
        let status: ClusterStatus =
            serde_json::from_str("\"NetAddressCreating\"").expect("status parses");
        assert_eq!(status, ClusterStatus::Other(String::from("NetAddressCreating")));
        assert_eq!(
            serde_json::to_string(&status).expect("status serializes"),
            "\"NetAddressCreating\""
        );
    }

    #[test]
    fn test_attribute_parses_control_plane_body() {
        let body = r#"{
            "DBClusterId": "pc-abc",
            "DBClusterStatus": "Running",
            "PayType": "Prepaid",
            "DBType": "MySQL",
            "DBVersion": "8.0",
            "DBNodes": [
                {"DBNodeId": "pi-1", "DBNodeRole": "Writer", "DBNodeClass": "polar.mysql.x4.large"},
                {"DBNodeId": "pi-2", "DBNodeRole": "Reader", "DBNodeClass": "polar.mysql.x4.large"}
            ]
        }"#;
        let attribute: DbClusterAttribute = serde_json::from_str(body).expect("body parses");
        let snapshot = ClusterSnapshot::from_attribute(attribute);

        assert_eq!(snapshot.id, "pc-abc");
        assert!(snapshot.is_running());
        assert_eq!(snapshot.pay_type, PayType::Prepaid);
        assert_eq!(snapshot.db_node_class, "polar.mysql.x4.large");
        assert_eq!(snapshot.nodes[0].role, "Writer");
        assert_eq!(snapshot.nodes.len(), 2);
    }

    #[test]
    fn test_node_class_taken_from_writer() {
        let body = r#"{
            "DBClusterId": "pc-abc",
            "DBNodes": [
                {"DBNodeId": "pi-2", "DBNodeRole": "Reader", "DBNodeClass": "polar.mysql.x2.medium"},
                {"DBNodeId": "pi-1", "DBNodeRole": "Writer", "DBNodeClass": "polar.mysql.x4.large"}
            ]
        }"#;
        let attribute: DbClusterAttribute = serde_json::from_str(body).expect("body parses");

        let snapshot = ClusterSnapshot::from_attribute(attribute);

        assert_eq!(snapshot.db_node_class, "polar.mysql.x4.large");
        assert_eq!(snapshot.nodes[0].id, "pi-2");
    }

    #[test]
    fn test_create_request_omits_unset_fields() {
        let request = CreateDbClusterRequest {
            region_id: String::from("cn-hangzhou"),
            db_type: String::from("MySQL"),
            db_version: String::from("8.0"),
            db_node_class: String::from("polar.mysql.x4.large"),
            pay_type: PayType::Postpaid,
            description: None,
            client_token: String::from("token"),
            zone_id: None,
            vswitch_id: None,
            vpc_id: None,
            cluster_network_type: None,
            used_time: None,
            period: None,
            auto_renew: None,
        };
        let json = serde_json::to_value(&request).expect("request serializes");
        assert_eq!(json["DBType"], "MySQL");
        assert!(json.get("UsedTime").is_none());
        assert!(json.get("VPCId").is_none());
    }

    #[test]
    fn test_client_token_bounded() {
        let token = build_client_token("CreateDBCluster");
        assert!(token.len() <= CLIENT_TOKEN_MAX_LEN);
        assert!(token.starts_with("polarctl-CreateDBCluster-"));
        assert_ne!(token, build_client_token("CreateDBCluster"));
    }
}
