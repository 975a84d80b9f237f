//! PolarDB control-plane client.
//!
//! [`PolarDbApi`] has one method per remote operation the reconciler uses;
//! [`PolarDbClient`] implements it over HTTP. Every request is a JSON
//! envelope posted to the endpoint, named by its `Action` and authorised with
//! a bearer token. Failures come back as `{Code, Message, RequestId}` and are
//! surfaced as [`CloudApiError::Api`] so callers can classify the code.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{CloudApiError, ProvisionerError, Result};

use super::types::{
    AutoRenewAttribute, ClusterParameter, CreateDbClusterRequest, CreateDbClusterResponse,
    DbClusterAttribute, DbClusterPage, DescribeDbClustersRequest, ModifyAutoRenewRequest,
    ModifyParametersRequest, VSwitch,
};

/// Default PolarDB API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://polardb.aliyuncs.com";

/// Default VPC API endpoint.
pub const DEFAULT_VPC_ENDPOINT: &str = "https://vpc.aliyuncs.com";

/// Header carrying the hex SHA-256 of the request body.
const CONTENT_DIGEST_HEADER: &str = "x-acs-content-sha256";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient transport failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Remote operations on clusters.
#[async_trait]
pub trait PolarDbApi: Send + Sync {
    /// `CreateDBCluster`.
    async fn create_db_cluster(
        &self,
        request: &CreateDbClusterRequest,
    ) -> Result<CreateDbClusterResponse>;

    /// `DescribeDBClusterAttribute`.
    async fn describe_db_cluster_attribute(&self, cluster_id: &str) -> Result<DbClusterAttribute>;

    /// `DescribeDBClusters`, one page.
    async fn describe_db_clusters(
        &self,
        request: &DescribeDbClustersRequest,
    ) -> Result<DbClusterPage>;

    /// `DeleteDBCluster`.
    async fn delete_db_cluster(&self, cluster_id: &str) -> Result<()>;

    /// `ModifyDBClusterParameters`.
    async fn modify_db_cluster_parameters(&self, request: &ModifyParametersRequest) -> Result<()>;

    /// `DescribeDBClusterParameters`.
    async fn describe_db_cluster_parameters(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ClusterParameter>>;

    /// `ModifyAutoRenewAttribute`.
    async fn modify_auto_renew_attribute(&self, request: &ModifyAutoRenewRequest) -> Result<()>;

    /// `DescribeAutoRenewAttribute`. `None` when the control plane lists no attribute.
    async fn describe_auto_renew_attribute(
        &self,
        cluster_id: &str,
    ) -> Result<Option<AutoRenewAttribute>>;

    /// `ModifyDBClusterMaintainTime`.
    async fn modify_db_cluster_maintain_time(
        &self,
        cluster_id: &str,
        maintain_time: &str,
    ) -> Result<()>;

    /// `ModifyDBClusterDescription`.
    async fn modify_db_cluster_description(&self, cluster_id: &str, description: &str)
    -> Result<()>;

    /// `ModifyDBClusterAccessWhitelist`; `security_ips` is comma separated.
    async fn modify_db_cluster_access_whitelist(
        &self,
        cluster_id: &str,
        security_ips: &str,
    ) -> Result<()>;

    /// `DescribeDBClusterAccessWhitelist`, flattened to single entries.
    async fn describe_db_cluster_access_whitelist(&self, cluster_id: &str) -> Result<Vec<String>>;
}

/// Resolves network objects referenced by a cluster spec.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkLookup: Send + Sync {
    /// `DescribeVSwitchAttributes`.
    async fn describe_vswitch(&self, vswitch_id: &str) -> Result<VSwitch>;
}

/// HTTP implementation of [`PolarDbApi`] and [`NetworkLookup`].
#[derive(Debug, Clone)]
pub struct PolarDbClient {
    /// HTTP client.
    client: Client,
    /// API token.
    api_token: String,
    /// Region every request is scoped to.
    region: String,
    /// PolarDB endpoint.
    endpoint: String,
    /// VPC endpoint.
    vpc_endpoint: String,
}

/// Error body returned by the control plane.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: String,
}

/// Body of calls whose only output is a request id.
#[derive(Debug, Deserialize)]
struct Ack {
    #[serde(rename = "RequestId", default)]
    _request_id: String,
}

impl PolarDbClient {
    /// Creates a new client for a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_token: &str, region: &str) -> Result<Self> {
        Self::with_timeout(api_token, region, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(api_token: &str, region: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CloudApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_token: api_token.to_string(),
            region: region.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            vpc_endpoint: DEFAULT_VPC_ENDPOINT.to_string(),
        })
    }

    /// Overrides the PolarDB endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the VPC endpoint.
    #[must_use]
    pub fn with_vpc_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.vpc_endpoint = endpoint.into();
        self
    }

    /// Returns the region requests are scoped to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Executes an action against the PolarDB endpoint.
    async fn call<T: DeserializeOwned>(&self, action: &str, params: serde_json::Value) -> Result<T> {
        self.execute(&self.endpoint, action, params).await
    }

    /// Executes an action, retrying transient transport failures.
    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        action: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = self.envelope(action, params)?;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("{action}: retry attempt {attempt} of {MAX_RETRIES}");
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.execute_once::<T>(endpoint, action, &body).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_transport_retryable() {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProvisionerError::Cloud(CloudApiError::NetworkError {
                message: String::from("Max retries exceeded"),
            })
        }))
    }

    /// Serializes the request envelope.
    fn envelope(&self, action: &str, params: serde_json::Value) -> Result<Vec<u8>> {
        let mut body = serde_json::Map::new();
        body.insert("Action".into(), action.into());
        body.insert("RegionId".into(), self.region.clone().into());

        match params {
            serde_json::Value::Object(map) => body.extend(map),
            serde_json::Value::Null => {}
            other => {
                return Err(ProvisionerError::internal(format!(
                    "{action}: request parameters must be an object, got {other}"
                )));
            }
        }

        serde_json::to_vec(&body).map_err(|e| {
            ProvisionerError::internal(format!("{action}: failed to serialize request: {e}"))
        })
    }

    /// Executes a single request.
    async fn execute_once<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        action: &str,
        body: &[u8],
    ) -> Result<T> {
        trace!("POST {endpoint} {action}");

        let response = self
            .client
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(CONTENT_DIGEST_HEADER, hex::encode(Sha256::digest(body)))
            .header("x-acs-action", action)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| CloudApiError::network(format!("{action}: request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(ProvisionerError::Cloud(CloudApiError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        let text = response
            .text()
            .await
            .map_err(|e| CloudApiError::network(format!("{action}: failed to read body: {e}")))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ErrorBody>(&text) {
                debug!("{action} returned {}: {}", error.code, error.message);
                if error.code == "Throttling" || error.code.starts_with("Throttling.") {
                    return Err(ProvisionerError::Cloud(CloudApiError::RateLimited {
                        retry_after_secs: 5,
                    }));
                }
                return Err(ProvisionerError::Cloud(CloudApiError::api(
                    action,
                    error.code,
                    error.message,
                    error.request_id,
                )));
            }

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProvisionerError::Cloud(CloudApiError::AuthenticationFailed {
                    message: String::from("Invalid API token"),
                }));
            }

            return Err(ProvisionerError::Cloud(CloudApiError::InvalidResponse {
                message: format!("{action}: HTTP {status}: {text}"),
            }));
        }

        serde_json::from_str(&text).map_err(|e| {
            ProvisionerError::Cloud(CloudApiError::InvalidResponse {
                message: format!("{action}: failed to parse response: {e}"),
            })
        })
    }
}

/// Serializes a typed request into envelope parameters.
fn params<T: serde::Serialize>(action: &str, request: &T) -> Result<serde_json::Value> {
    serde_json::to_value(request).map_err(|e| {
        ProvisionerError::internal(format!("{action}: failed to serialize request: {e}"))
    })
}

#[async_trait]
impl PolarDbApi for PolarDbClient {
    async fn create_db_cluster(
        &self,
        request: &CreateDbClusterRequest,
    ) -> Result<CreateDbClusterResponse> {
        let action = "CreateDBCluster";
        debug!("{action}: {} {}", request.db_type, request.db_version);
        self.call(action, params(action, request)?).await
    }

    async fn describe_db_cluster_attribute(&self, cluster_id: &str) -> Result<DbClusterAttribute> {
        self.call(
            "DescribeDBClusterAttribute",
            serde_json::json!({ "DBClusterId": cluster_id }),
        )
        .await
    }

    async fn describe_db_clusters(
        &self,
        request: &DescribeDbClustersRequest,
    ) -> Result<DbClusterPage> {
        let action = "DescribeDBClusters";
        self.call(action, params(action, request)?).await
    }

    async fn delete_db_cluster(&self, cluster_id: &str) -> Result<()> {
        let _: Ack = self
            .call(
                "DeleteDBCluster",
                serde_json::json!({ "DBClusterId": cluster_id }),
            )
            .await?;
        Ok(())
    }

    async fn modify_db_cluster_parameters(&self, request: &ModifyParametersRequest) -> Result<()> {
        let action = "ModifyDBClusterParameters";
        // Parameters travel as a JSON document in a string field
        let parameters = serde_json::to_string(&request.parameters).map_err(|e| {
            ProvisionerError::internal(format!("{action}: failed to serialize parameters: {e}"))
        })?;
        let _: Ack = self
            .call(
                action,
                serde_json::json!({
                    "DBClusterId": request.db_cluster_id,
                    "Parameters": parameters,
                    "EffectiveTime": request.effective_time.to_string(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn describe_db_cluster_parameters(
        &self,
        cluster_id: &str,
    ) -> Result<Vec<ClusterParameter>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "RunningParameters", default)]
            parameters: Vec<ClusterParameter>,
        }

        let response: Response = self
            .call(
                "DescribeDBClusterParameters",
                serde_json::json!({ "DBClusterId": cluster_id }),
            )
            .await?;
        Ok(response.parameters)
    }

    async fn modify_auto_renew_attribute(&self, request: &ModifyAutoRenewRequest) -> Result<()> {
        let action = "ModifyAutoRenewAttribute";
        let _: Ack = self.call(action, params(action, request)?).await?;
        Ok(())
    }

    async fn describe_auto_renew_attribute(
        &self,
        cluster_id: &str,
    ) -> Result<Option<AutoRenewAttribute>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "Items", default)]
            items: Vec<AutoRenewAttribute>,
        }

        let action = "DescribeAutoRenewAttribute";
        let response: Response = self
            .call(action, serde_json::json!({ "DBClusterIds": cluster_id }))
            .await?;

        Ok(response.items.into_iter().next())
    }

    async fn modify_db_cluster_maintain_time(
        &self,
        cluster_id: &str,
        maintain_time: &str,
    ) -> Result<()> {
        let _: Ack = self
            .call(
                "ModifyDBClusterMaintainTime",
                serde_json::json!({ "DBClusterId": cluster_id, "MaintainTime": maintain_time }),
            )
            .await?;
        Ok(())
    }

    async fn modify_db_cluster_description(
        &self,
        cluster_id: &str,
        description: &str,
    ) -> Result<()> {
        let _: Ack = self
            .call(
                "ModifyDBClusterDescription",
                serde_json::json!({
                    "DBClusterId": cluster_id,
                    "DBClusterDescription": description,
                }),
            )
            .await?;
        Ok(())
    }

    async fn modify_db_cluster_access_whitelist(
        &self,
        cluster_id: &str,
        security_ips: &str,
    ) -> Result<()> {
        let _: Ack = self
            .call(
                "ModifyDBClusterAccessWhitelist",
                serde_json::json!({ "DBClusterId": cluster_id, "SecurityIps": security_ips }),
            )
            .await?;
        Ok(())
    }

    async fn describe_db_cluster_access_whitelist(&self, cluster_id: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "Items", default)]
            items: Vec<IpArray>,
        }
        #[derive(Deserialize)]
        struct IpArray {
            #[serde(rename = "SecurityIps", default)]
            security_ips: String,
        }

        let response: Response = self
            .call(
                "DescribeDBClusterAccessWhitelist",
                serde_json::json!({ "DBClusterId": cluster_id }),
            )
            .await?;

        Ok(response
            .items
            .iter()
            .flat_map(|array| array.security_ips.split(','))
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl NetworkLookup for PolarDbClient {
    async fn describe_vswitch(&self, vswitch_id: &str) -> Result<VSwitch> {
        self.execute(
            &self.vpc_endpoint,
            "DescribeVSwitchAttributes",
            serde_json::json!({ "VSwitchId": vswitch_id }),
        )
        .await
    }
}

/// Flattens observed parameters into a name-to-value map.
#[must_use]
pub fn parameter_map(parameters: Vec<ClusterParameter>) -> BTreeMap<String, String> {
    parameters
        .into_iter()
        .map(|p| (p.parameter_name, p.parameter_value))
        .collect()
}
