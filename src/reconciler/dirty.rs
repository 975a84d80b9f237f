//! Field-level diff between a spec and a snapshot.
//!
//! [`compute_dirty`] is pure: it never calls the control plane, so running
//! it twice against the same snapshot yields the same set.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::cloud::ClusterSnapshot;
use crate::config::{BillingTerm, ClusterSpec, PayType, RenewalStatus};
use crate::error::{ConfigError, Result};

/// A mutable field group that can be converged independently.
///
/// Variants are declared in convergence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FieldTag {
    /// Engine parameters.
    Parameters,
    /// Renewal settings of a prepaid cluster.
    Renewal,
    /// Maintenance window.
    MaintainTime,
    /// Display name.
    Description,
    /// Allow-list.
    SecurityIps,
}

impl FieldTag {
    /// Every tag in convergence order.
    pub const ALL: [Self; 5] = [
        Self::Parameters,
        Self::Renewal,
        Self::MaintainTime,
        Self::Description,
        Self::SecurityIps,
    ];

    /// Manifest key of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parameters => "parameters",
            Self::Renewal => "renewal",
            Self::MaintainTime => "maintain_time",
            Self::Description => "description",
            Self::SecurityIps => "security_ips",
        }
    }
}

impl std::fmt::Display for FieldTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields whose desired value differs from the observed one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirtyFields(BTreeSet<FieldTag>);

impl DirtyFields {
    /// An empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Marks a field dirty.
    pub fn insert(&mut self, tag: FieldTag) {
        self.0.insert(tag);
    }

    /// Marks a field clean.
    pub fn mark_clean(&mut self, tag: FieldTag) {
        self.0.remove(&tag);
    }

    /// Whether a field is dirty.
    #[must_use]
    pub fn contains(&self, tag: FieldTag) -> bool {
        self.0.contains(&tag)
    }

    /// Whether nothing is dirty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of dirty fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Dirty fields in convergence order.
    pub fn iter(&self) -> impl Iterator<Item = FieldTag> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<FieldTag> for DirtyFields {
    fn from_iter<I: IntoIterator<Item = FieldTag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for DirtyFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.iter().map(FieldTag::as_str).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// A change to a field that can only be set at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImmutableChange {
    /// Manifest key.
    pub field: &'static str,
    /// Observed value.
    pub current: String,
    /// Desired value.
    pub desired: String,
}

/// Computes which mutable fields need converging.
///
/// Only fields set in the manifest are compared; unset optional fields keep
/// whatever the cluster has.
#[must_use]
pub fn compute_dirty(desired: &ClusterSpec, snapshot: &ClusterSnapshot) -> DirtyFields {
    let mut dirty = DirtyFields::new();

    if desired
        .parameters
        .iter()
        .any(|p| snapshot.parameters.get(&p.name) != Some(&p.value))
    {
        dirty.insert(FieldTag::Parameters);
    }

    if renewal_differs(desired, snapshot) {
        dirty.insert(FieldTag::Renewal);
    }

    if let Some(maintain_time) = &desired.maintain_time
        && *maintain_time != snapshot.maintain_time
    {
        dirty.insert(FieldTag::MaintainTime);
    }

    if let Some(description) = &desired.description
        && *description != snapshot.description
    {
        dirty.insert(FieldTag::Description);
    }

    if let Some(ips) = desired.effective_security_ips()
        && ips != snapshot.security_ips
    {
        dirty.insert(FieldTag::SecurityIps);
    }

    dirty
}

fn renewal_differs(desired: &ClusterSpec, snapshot: &ClusterSnapshot) -> bool {
    let BillingTerm::Prepaid { renewal: policy, .. } = desired.billing_term() else {
        return false;
    };
    if snapshot.pay_type != PayType::Prepaid {
        return false;
    }

    // Nothing reported: keep what was last applied.
    match snapshot.renewal {
        None => false,
        Some(observed) => {
            observed.status != policy.status
                || (policy.status == RenewalStatus::AutoRenewal
                    && observed.duration_months != policy.auto_renew_period_months)
        }
    }
}

/// Lists changes to creation-only fields.
#[must_use]
pub fn immutable_changes(desired: &ClusterSpec, snapshot: &ClusterSnapshot) -> Vec<ImmutableChange> {
    let mut changes = Vec::new();
    let mut check = |field: &'static str, current: &str, wanted: &str| {
        if !current.is_empty() && current != wanted {
            changes.push(ImmutableChange {
                field,
                current: current.to_string(),
                desired: wanted.to_string(),
            });
        }
    };

    check("db_type", &snapshot.db_type, desired.db_type.trim());
    check("db_version", &snapshot.db_version, desired.db_version.trim());
    check("db_node_class", &snapshot.db_node_class, desired.db_node_class.trim());
    if let Some(vswitch) = desired.vswitch() {
        check("vswitch_id", &snapshot.vswitch_id, vswitch);
    }

    changes
}

/// Rejects changes to creation-only fields.
///
/// # Errors
///
/// Returns `ConfigError::ImmutableField` for the first such change.
pub fn check_immutable(desired: &ClusterSpec, snapshot: &ClusterSnapshot) -> Result<()> {
    match immutable_changes(desired, snapshot).into_iter().next() {
        None => Ok(()),
        Some(change) => Err(ConfigError::ImmutableField {
            field: change.field.to_string(),
            current: change.current,
            desired: change.desired,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ClusterStatus, DbClusterAttribute, RenewalInfo};
    use crate::config::ParameterSpec;
    use std::collections::BTreeSet;

    fn spec() -> ClusterSpec {
        ClusterSpec::new("orders", "MySQL", "8.0", "polar.mysql.x4.large")
    }

    fn snapshot() -> ClusterSnapshot {
        let mut snapshot = ClusterSnapshot::from_attribute(DbClusterAttribute {
            id: String::from("pc-1"),
            status: ClusterStatus::Running,
            db_type: String::from("MySQL"),
            db_version: String::from("8.0"),
            maintain_time: String::from("16:00Z-17:00Z"),
            description: String::from("orders"),
            ..DbClusterAttribute::default()
        });
        snapshot.db_node_class = String::from("polar.mysql.x4.large");
        snapshot.security_ips = BTreeSet::from([String::from("127.0.0.1")]);
        snapshot
    }

    #[test]
    fn test_defaults_are_clean() {
        assert!(compute_dirty(&spec(), &snapshot()).is_empty());
    }

    #[test]
    fn test_each_field_detected() {
        let mut desired = spec();
        desired.parameters = vec![ParameterSpec {
            name: String::from("wait_timeout"),
            value: String::from("86400"),
        }];
        desired.maintain_time = Some(String::from("18:00Z-19:00Z"));
        desired.description = Some(String::from("orders-primary"));
        desired.security_ips = Some(BTreeSet::from([String::from("10.0.0.0/8")]));

        let dirty = compute_dirty(&desired, &snapshot());

        assert_eq!(
            dirty.iter().collect::<Vec<_>>(),
            vec![
                FieldTag::Parameters,
                FieldTag::MaintainTime,
                FieldTag::Description,
                FieldTag::SecurityIps,
            ]
        );
    }

    #[test]
    fn test_empty_allow_list_compares_as_localhost() {
        let mut desired = spec();
        desired.security_ips = Some(BTreeSet::new());
        assert!(!compute_dirty(&desired, &snapshot()).contains(FieldTag::SecurityIps));
    }

    #[test]
    fn test_renewal_only_for_prepaid() {
        let mut desired = spec();
        desired.renewal_status = RenewalStatus::AutoRenewal;
        assert!(!compute_dirty(&desired, &snapshot()).contains(FieldTag::Renewal));

        desired.pay_type = PayType::Prepaid;
        let mut observed = snapshot();
        observed.pay_type = PayType::Prepaid;
        observed.renewal = Some(RenewalInfo {
            auto_renew_enabled: false,
            status: RenewalStatus::Normal,
            duration_months: 1,
        });
        assert!(compute_dirty(&desired, &observed).contains(FieldTag::Renewal));

        observed.renewal = Some(RenewalInfo {
            auto_renew_enabled: true,
            status: RenewalStatus::AutoRenewal,
            duration_months: 1,
        });
        assert!(!compute_dirty(&desired, &observed).contains(FieldTag::Renewal));

        desired.auto_renew_period = 6;
        assert!(compute_dirty(&desired, &observed).contains(FieldTag::Renewal));

        observed.renewal = None;
        assert!(!compute_dirty(&desired, &observed).contains(FieldTag::Renewal));
    }

    #[test]
    fn test_mark_clean() {
        let mut dirty: DirtyFields = [FieldTag::Description, FieldTag::Parameters]
            .into_iter()
            .collect();
        dirty.mark_clean(FieldTag::Parameters);
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty.to_string(), "description");
    }

    #[test]
    fn test_immutable_change_detected() {
        let mut desired = spec();
        desired.db_node_class = String::from("polar.mysql.x8.large");

        let err = check_immutable(&desired, &snapshot()).expect_err("node class changed");
        assert!(err.to_string().contains("db_node_class"));

        assert!(check_immutable(&spec(), &snapshot()).is_ok());
    }

    #[test]
    fn test_vswitch_only_checked_when_set() {
        let mut observed = snapshot();
        observed.vswitch_id = String::from("vsw-1");
        assert!(immutable_changes(&spec(), &observed).is_empty());

        let mut desired = spec();
        desired.vswitch_id = Some(String::from("vsw-2"));
        assert_eq!(immutable_changes(&desired, &observed)[0].field, "vswitch_id");
    }
}
