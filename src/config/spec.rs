//! Manifest types for the provisioner.
//!
//! This module defines all the structs that map to the `polardb.deploy.yaml`
//! file. A manifest fully describes the desired state of a set of clusters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use validator::Validate;

/// Address written to the allow-list when the configured set is empty.
pub const LOCALHOST_IP: &str = "127.0.0.1";

/// The root configuration structure of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployConfig {
    /// Control-plane configuration.
    pub provider: ProviderConfig,
    /// State backend configuration.
    pub state: StateConfig,
    /// Clusters to provision.
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
}

/// Control-plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Region every cluster is created in.
    pub region: String,
    /// PolarDB API endpoint override.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// VPC API endpoint override, used for vswitch lookups.
    #[serde(default)]
    pub vpc_endpoint: Option<String>,
    /// Polling behaviour while waiting for clusters.
    #[serde(default)]
    pub wait: WaitSettings,
}

/// Polling behaviour while waiting for a cluster to change state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitSettings {
    /// Seconds between two describe calls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds to wait after a create call before the first poll.
    #[serde(default = "default_create_delay")]
    pub create_delay_secs: u64,
    /// Seconds to wait after a billing mutation before the first poll.
    #[serde(default = "default_update_delay")]
    pub update_delay_secs: u64,
    /// Consecutive not-found answers tolerated while waiting.
    #[serde(default = "default_not_found_checks")]
    pub not_found_checks: u32,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Billing mode of a cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum PayType {
    /// Pay-as-you-go.
    #[default]
    Postpaid,
    /// Fixed term, released on expiry.
    Prepaid,
}

/// Renewal policy of a prepaid cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RenewalStatus {
    /// Renewed automatically for `auto_renew_period` months.
    AutoRenewal,
    /// Renewed manually.
    #[default]
    Normal,
    /// Never renewed.
    NotRenewal,
}

/// When engine parameter changes take effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EffectiveTime {
    /// Let the control plane decide.
    #[default]
    Auto,
    /// Restart now if required.
    Immediately,
    /// Apply in the maintenance window.
    MaintainTime,
}

/// A single engine parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

/// Per-operation time budgets, in minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutsConfig {
    /// Budget for create, including the wait for `Running`.
    #[serde(default = "default_create_timeout")]
    pub create_mins: u64,
    /// Budget for each wait of an update pass.
    #[serde(default = "default_update_timeout")]
    pub update_mins: u64,
    /// Budget for delete retries.
    #[serde(default = "default_delete_timeout")]
    pub delete_mins: u64,
}

/// Desired state of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ClusterSpec {
    /// Local name of the cluster; keys the cluster in the state file.
    pub name: String,
    /// Database engine, e.g. `MySQL`. Immutable.
    pub db_type: String,
    /// Engine version, e.g. `8.0`. Immutable.
    pub db_version: String,
    /// Node class, e.g. `polar.mysql.x4.large`. Immutable.
    pub db_node_class: String,
    /// Zone, or a multi-zone token; adopted from the vswitch when absent.
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Deprecated, ignored.
    #[serde(default)]
    pub cluster_network_type: Option<String>,
    /// Billing mode.
    #[serde(default)]
    pub pay_type: PayType,
    /// Renewal policy (prepaid only).
    #[serde(default)]
    pub renewal_status: RenewalStatus,
    /// Whether the first purchase renews automatically (prepaid only).
    #[serde(default)]
    pub auto_renew: bool,
    /// Months per automatic renewal (prepaid only).
    #[serde(default = "default_one")]
    pub auto_renew_period: u32,
    /// Months purchased up front (prepaid only).
    #[serde(default = "default_one")]
    pub period: u32,
    /// Allowed source addresses; `None` keeps whatever the cluster has.
    #[serde(default)]
    pub security_ips: Option<BTreeSet<String>>,
    /// Vswitch to attach to. Immutable.
    #[serde(default)]
    pub vswitch_id: Option<String>,
    /// Maintenance window, e.g. `16:00Z-17:00Z`; `None` keeps the remote one.
    #[serde(default)]
    pub maintain_time: Option<String>,
    /// Display name.
    #[serde(default)]
    #[validate(length(min = 2, max = 256))]
    pub description: Option<String>,
    /// Engine parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// When parameter changes take effect.
    #[serde(default)]
    pub effective_time: EffectiveTime,
    /// Operation budgets.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Typed view of the billing fields of a [`ClusterSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingTerm {
    /// Pay-as-you-go; no renewal settings apply.
    Postpaid,
    /// Fixed term.
    Prepaid {
        /// Months purchased at creation.
        period_months: u32,
        /// Whether the initial purchase renews automatically.
        auto_renew: bool,
        /// Renewal policy applied after creation.
        renewal: RenewalPolicy,
    },
}

/// Renewal settings of a prepaid cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    /// Renewal status.
    pub status: RenewalStatus,
    /// Months per automatic renewal.
    pub auto_renew_period_months: u32,
}

const fn default_poll_interval() -> u64 {
    10
}

const fn default_create_delay() -> u64 {
    300
}

const fn default_update_delay() -> u64 {
    60
}

const fn default_not_found_checks() -> u32 {
    20
}

const fn default_create_timeout() -> u64 {
    30
}

const fn default_update_timeout() -> u64 {
    30
}

const fn default_delete_timeout() -> u64 {
    20
}

const fn default_one() -> u32 {
    1
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            create_delay_secs: default_create_delay(),
            update_delay_secs: default_update_delay(),
            not_found_checks: default_not_found_checks(),
        }
    }
}

impl WaitSettings {
    /// Settings without delays, polling as fast as possible.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            poll_interval_secs: 0,
            create_delay_secs: 0,
            update_delay_secs: 0,
            not_found_checks: 3,
        }
    }

    /// Interval between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay before the first poll after a create.
    #[must_use]
    pub const fn create_delay(&self) -> Duration {
        Duration::from_secs(self.create_delay_secs)
    }

    /// Delay before the first poll after a billing mutation.
    #[must_use]
    pub const fn update_delay(&self) -> Duration {
        Duration::from_secs(self.update_delay_secs)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            create_mins: default_create_timeout(),
            update_mins: default_update_timeout(),
            delete_mins: default_delete_timeout(),
        }
    }
}

impl TimeoutsConfig {
    /// Create budget.
    #[must_use]
    pub const fn create(&self) -> Duration {
        Duration::from_secs(self.create_mins * 60)
    }

    /// Update budget.
    #[must_use]
    pub const fn update(&self) -> Duration {
        Duration::from_secs(self.update_mins * 60)
    }

    /// Delete budget.
    #[must_use]
    pub const fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_mins * 60)
    }
}

impl ClusterSpec {
    /// Creates a postpaid cluster spec with every optional field at its default.
    #[must_use]
    pub fn new(name: &str, db_type: &str, db_version: &str, db_node_class: &str) -> Self {
        Self {
            name: name.to_string(),
            db_type: db_type.to_string(),
            db_version: db_version.to_string(),
            db_node_class: db_node_class.to_string(),
            zone_id: None,
            cluster_network_type: None,
            pay_type: PayType::default(),
            renewal_status: RenewalStatus::default(),
            auto_renew: false,
            auto_renew_period: default_one(),
            period: default_one(),
            security_ips: None,
            vswitch_id: None,
            maintain_time: None,
            description: None,
            parameters: Vec::new(),
            effective_time: EffectiveTime::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }

    /// Returns the billing fields as a tagged variant.
    #[must_use]
    pub const fn billing_term(&self) -> BillingTerm {
        match self.pay_type {
            PayType::Postpaid => BillingTerm::Postpaid,
            PayType::Prepaid => BillingTerm::Prepaid {
                period_months: self.period,
                auto_renew: self.auto_renew,
                renewal: RenewalPolicy {
                    status: self.renewal_status,
                    auto_renew_period_months: self.auto_renew_period,
                },
            },
        }
    }

    /// Returns the allow-list that should be applied, if one is configured.
    ///
    /// An empty configured set becomes the localhost-only address so the
    /// cluster is never left open by omission.
    #[must_use]
    pub fn effective_security_ips(&self) -> Option<BTreeSet<String>> {
        self.security_ips.as_ref().map(|ips| {
            let ips: BTreeSet<String> = ips
                .iter()
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect();
            if ips.is_empty() {
                BTreeSet::from([LOCALHOST_IP.to_string()])
            } else {
                ips
            }
        })
    }

    /// Returns the trimmed vswitch id, if one is set.
    #[must_use]
    pub fn vswitch(&self) -> Option<&str> {
        self.vswitch_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Returns the trimmed requested zone, if one is set.
    #[must_use]
    pub fn zone(&self) -> Option<&str> {
        self.zone_id
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty())
    }
}

impl DeployConfig {
    /// Finds a cluster by its local name.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterSpec> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

impl BillingTerm {
    /// Returns true for prepaid clusters.
    #[must_use]
    pub const fn is_prepaid(&self) -> bool {
        matches!(self, Self::Prepaid { .. })
    }

    /// Returns the renewal policy of a prepaid cluster.
    #[must_use]
    pub const fn renewal(&self) -> Option<RenewalPolicy> {
        match self {
            Self::Postpaid => None,
            Self::Prepaid { renewal, .. } => Some(*renewal),
        }
    }
}

impl std::fmt::Display for PayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Postpaid => "Postpaid",
            Self::Prepaid => "Prepaid",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for RenewalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AutoRenewal => "AutoRenewal",
            Self::Normal => "Normal",
            Self::NotRenewal => "NotRenewal",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for EffectiveTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "Auto",
            Self::Immediately => "Immediately",
            Self::MaintainTime => "MaintainTime",
        };
        write!(f, "{s}")
    }
}
