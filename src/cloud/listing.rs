//! Cluster listing.
//!
//! Pages through `DescribeDBClusters`; server-side filters are passed in the
//! request, the name pattern and the id set are applied locally.

use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::client::PolarDbApi;
use super::types::{ClusterSummary, DescribeDbClustersRequest};

/// Page size used for listing.
pub const PAGE_SIZE: u32 = 50;

/// Filters for [`list_clusters`].
#[derive(Debug, Clone, Default)]
pub struct ClusterQuery {
    /// Regular expression matched against the description.
    pub name_regex: Option<String>,
    /// Only these cluster ids.
    pub ids: Vec<String>,
    /// Exact description.
    pub description: Option<String>,
    /// Status filter.
    pub status: Option<String>,
    /// Engine filter.
    pub db_type: Option<String>,
}

/// Lists clusters matching a query.
///
/// # Errors
///
/// Returns an error if the name pattern is not a valid regular expression
/// or a page cannot be fetched.
pub async fn list_clusters(
    api: &dyn PolarDbApi,
    query: &ClusterQuery,
) -> Result<Vec<ClusterSummary>> {
    let name_regex = query
        .name_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| ConfigError::validation(format!("Invalid name regex: {e}"), "name_regex"))?;

    let ids: HashSet<&str> = query.ids.iter().map(String::as_str).collect();

    let mut request = DescribeDbClustersRequest {
        db_cluster_ids: (!query.ids.is_empty()).then(|| query.ids.join(",")),
        description: query.description.clone(),
        status: query.status.clone(),
        db_type: query.db_type.clone(),
        page_size: PAGE_SIZE,
        page_number: 1,
    };

    let mut clusters = Vec::new();

    loop {
        let page = api.describe_db_clusters(&request).await?;
        let count = page.items.len();
        debug!("DescribeDBClusters page {}: {count} item(s)", request.page_number);

        clusters.extend(page.items.into_iter().filter(|item| {
            name_regex
                .as_ref()
                .is_none_or(|re| re.is_match(&item.description))
                && (ids.is_empty() || ids.contains(item.id.as_str()))
        }));

        if count < PAGE_SIZE as usize {
            break;
        }
        request.page_number += 1;
    }

    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::testing::FakePolarDb;
    use crate::config::PayType;

    fn fake_with(count: usize) -> FakePolarDb {
        let fake = FakePolarDb::new();
        for i in 0..count {
            let id = format!("pc-{i:03}");
            fake.seed_cluster(&id, PayType::Postpaid);
            let prefix = if i % 2 == 0 { "orders" } else { "billing" };
            fake.set_description(&id, &format!("{prefix}-{i}"));
        }
        fake
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let fake = fake_with(120);

        let clusters = list_clusters(&fake, &ClusterQuery::default())
            .await
            .expect("listing succeeds");

        assert_eq!(clusters.len(), 120);
        assert_eq!(fake.count("DescribeDBClusters"), 3);
    }

    #[tokio::test]
    async fn test_name_regex_and_ids() {
        let fake = fake_with(6);

        let query = ClusterQuery {
            name_regex: Some(String::from("^orders-")),
            ..ClusterQuery::default()
        };
        let clusters = list_clusters(&fake, &query).await.expect("listing succeeds");
        assert_eq!(clusters.len(), 3);

        let query = ClusterQuery {
            name_regex: Some(String::from("^orders-")),
            ids: vec![String::from("pc-000"), String::from("pc-001")],
            ..ClusterQuery::default()
        };
        let clusters = list_clusters(&fake, &query).await.expect("listing succeeds");
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, "pc-000");
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let fake = fake_with(0);
        let query = ClusterQuery {
            name_regex: Some(String::from("(")),
            ..ClusterQuery::default()
        };

        assert!(tokio_test::block_on(list_clusters(&fake, &query)).is_err());
        assert_eq!(fake.count("DescribeDBClusters"), 0);
    }
}
