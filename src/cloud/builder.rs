//! Create-request construction.
//!
//! Turns a [`ClusterSpec`] into a [`CreateDbClusterRequest`], resolving the
//! vswitch to fill in the zone and VPC and checking that the requested zone
//! agrees with it. Nothing is sent to the control plane until every check
//! here has passed.

use tracing::debug;

use crate::config::{BillingTerm, ClusterSpec, MULTI_ZONE_SYMBOL, multi_zone_suffixes};
use crate::error::{ConfigError, Result};

use super::client::NetworkLookup;
use super::types::{CreateDbClusterRequest, PeriodUnit, build_client_token};

/// Network type used whenever a vswitch is given.
pub const VPC_NETWORK_TYPE: &str = "VPC";

/// Action name the create request is issued under.
pub const CREATE_ACTION: &str = "CreateDBCluster";

/// Builds the create request for a cluster.
///
/// # Errors
///
/// Returns a `ConfigError` when a required field is empty, when the vswitch
/// does not live in the requested zone, or when the period cannot be
/// expressed; lookup failures are propagated unchanged.
pub async fn build_create_request(
    spec: &ClusterSpec,
    region: &str,
    network: &dyn NetworkLookup,
) -> Result<CreateDbClusterRequest> {
    let db_type = required("db_type", &spec.db_type)?;
    let db_version = required("db_version", &spec.db_version)?;
    let db_node_class = required("db_node_class", &spec.db_node_class)?;

    let mut request = CreateDbClusterRequest {
        region_id: region.to_string(),
        db_type,
        db_version,
        db_node_class,
        pay_type: spec.pay_type,
        description: spec.description.clone(),
        client_token: build_client_token(CREATE_ACTION),
        zone_id: spec.zone().map(String::from),
        vswitch_id: None,
        vpc_id: None,
        cluster_network_type: None,
        used_time: None,
        period: None,
        auto_renew: None,
    };

    if let Some(vswitch_id) = spec.vswitch() {
        let vswitch = network.describe_vswitch(vswitch_id).await?;
        debug!(
            "Resolved vswitch {vswitch_id} to zone {} in {}",
            vswitch.zone_id, vswitch.vpc_id
        );

        let zone_id = match request.zone_id.take() {
            None => vswitch.zone_id.clone(),
            Some(zone) => {
                check_zone(vswitch_id, &zone, &vswitch.zone_id)?;
                zone
            }
        };

        request.zone_id = Some(zone_id);
        request.vswitch_id = Some(vswitch_id.to_string());
        request.vpc_id = Some(vswitch.vpc_id);
        request.cluster_network_type = Some(VPC_NETWORK_TYPE.to_string());
    }

    if let BillingTerm::Prepaid {
        period_months,
        auto_renew,
        ..
    } = spec.billing_term()
    {
        let (used_time, unit) = PeriodUnit::split_months(period_months)?;
        request.used_time = Some(used_time);
        request.period = Some(unit);
        request.auto_renew = Some(auto_renew);
    }

    Ok(request)
}

/// Checks that a vswitch zone agrees with the requested zone.
///
/// A multi-zone token such as `cn-hangzhou-MAZ6(b,f)` accepts any vswitch
/// whose zone ends with one of the listed suffixes.
fn check_zone(vswitch_id: &str, requested: &str, vswitch_zone: &str) -> Result<()> {
    if requested.contains(MULTI_ZONE_SYMBOL) {
        let suffixes = multi_zone_suffixes(requested).unwrap_or_default();
        let accepted = vswitch_zone
            .chars()
            .last()
            .is_some_and(|last| suffixes.contains(last));

        if accepted {
            Ok(())
        } else {
            Err(ConfigError::MultiZoneMismatch {
                vswitch_id: vswitch_id.to_string(),
                zone_id: requested.to_string(),
            }
            .into())
        }
    } else if requested == vswitch_zone {
        Ok(())
    } else {
        Err(ConfigError::ZoneMismatch {
            vswitch_id: vswitch_id.to_string(),
            zone_id: requested.to_string(),
        }
        .into())
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(ConfigError::validation(format!("'{field}' is required"), field).into())
    } else {
        Ok(value.to_string())
    }
}
