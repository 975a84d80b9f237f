//! Reads the observed state of a cluster.
//!
//! A snapshot combines the cluster attribute with its allow-list, engine
//! parameters and, for prepaid clusters, its renewal settings.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PayType;
use crate::error::Result;

use super::client::{PolarDbApi, parameter_map};
use super::types::{ClusterSnapshot, RenewalInfo};

/// Refreshes cluster snapshots from the control plane.
#[derive(Clone)]
pub struct AttributeReader {
    api: Arc<dyn PolarDbApi>,
}

impl std::fmt::Debug for AttributeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeReader").finish_non_exhaustive()
    }
}

impl AttributeReader {
    /// Creates a reader.
    #[must_use]
    pub fn new(api: Arc<dyn PolarDbApi>) -> Self {
        Self { api }
    }

    /// Reads the current state of a cluster.
    ///
    /// Returns `Ok(None)` when the control plane reports the cluster as not
    /// found; the caller is expected to clear the recorded identity.
    ///
    /// # Errors
    ///
    /// Returns an error if any describe call fails for another reason.
    pub async fn refresh(&self, cluster_id: &str) -> Result<Option<ClusterSnapshot>> {
        let attribute = match self.api.describe_db_cluster_attribute(cluster_id).await {
            Ok(attribute) => attribute,
            Err(e) if e.is_not_found() => {
                info!("Cluster {cluster_id} no longer exists");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut snapshot = ClusterSnapshot::from_attribute(attribute);

        snapshot.security_ips = self
            .api
            .describe_db_cluster_access_whitelist(cluster_id)
            .await?
            .into_iter()
            .collect();

        snapshot.parameters =
            parameter_map(self.api.describe_db_cluster_parameters(cluster_id).await?);

        if snapshot.pay_type == PayType::Prepaid {
            match self.api.describe_auto_renew_attribute(cluster_id).await? {
                Some(renewal) => {
                    snapshot.renewal = Some(RenewalInfo {
                        auto_renew_enabled: renewal.auto_renew_enabled,
                        status: renewal.renewal_status,
                        duration_months: renewal.period_unit.to_months(renewal.duration),
                    });
                }
                None => debug!("Cluster {cluster_id} reports no renewal attribute"),
            }
        }

        debug!(
            "Refreshed cluster {cluster_id}: {} ({} node(s))",
            snapshot.status,
            snapshot.nodes.len()
        );
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::FakePolarDb;
    use crate::cloud::types::{AutoRenewAttribute, PeriodUnit};
    use crate::config::RenewalStatus;

    #[tokio::test]
    async fn test_missing_cluster_reads_as_none() {
        let fake = Arc::new(FakePolarDb::new());
        let reader = AttributeReader::new(fake.clone());

        let snapshot = reader.refresh("pc-gone").await.expect("not found is not an error");

        assert!(snapshot.is_none());
    }

    #[tokio::test]
    async fn test_postpaid_skips_renewal_read() {
        let fake = Arc::new(FakePolarDb::new());
        fake.seed_cluster("pc-1", PayType::Postpaid);
        let reader = AttributeReader::new(fake.clone());

        let snapshot = reader
            .refresh("pc-1")
            .await
            .expect("refresh succeeds")
            .expect("cluster exists");

        assert!(snapshot.renewal.is_none());
        assert_eq!(fake.count("DescribeAutoRenewAttribute"), 0);
        assert!(snapshot.security_ips.contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_prepaid_renewal_normalised_to_months() {
        let fake = Arc::new(FakePolarDb::new());
        fake.seed_cluster("pc-1", PayType::Prepaid);
        fake.set_renewal(
            "pc-1",
            AutoRenewAttribute {
                db_cluster_id: String::from("pc-1"),
                auto_renew_enabled: true,
                renewal_status: RenewalStatus::AutoRenewal,
                duration: 1,
                period_unit: PeriodUnit::Year,
            },
        );
        let reader = AttributeReader::new(fake.clone());

        let snapshot = reader
            .refresh("pc-1")
            .await
            .expect("refresh succeeds")
            .expect("cluster exists");

        let renewal = snapshot.renewal.expect("prepaid has renewal info");
        assert!(renewal.auto_renew_enabled);
        assert_eq!(renewal.status, RenewalStatus::AutoRenewal);
        assert_eq!(renewal.duration_months, 12);
    }

    #[tokio::test]
    async fn test_prepaid_without_renewal_attribute() {
        let fake = Arc::new(FakePolarDb::new());
        fake.seed_cluster("pc-1", PayType::Prepaid);
        fake.clear_renewal("pc-1");
        let reader = AttributeReader::new(fake.clone());

        let snapshot = reader
            .refresh("pc-1")
            .await
            .expect("refresh succeeds")
            .expect("cluster exists");

        assert!(snapshot.renewal.is_none());
        assert_eq!(fake.count("DescribeAutoRenewAttribute"), 1);
    }
}
