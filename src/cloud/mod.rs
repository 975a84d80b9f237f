//! PolarDB control-plane integration.
//!
//! This module provides everything that talks to the control plane: the API
//! client, create-request construction, wait-for-state polling, snapshot
//! reads and cluster listing.

mod client;
mod types;
pub mod builder;
pub mod poller;
pub mod reader;
pub mod listing;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    DEFAULT_ENDPOINT, DEFAULT_VPC_ENDPOINT, NetworkLookup, PolarDbApi, PolarDbClient,
    parameter_map,
};
#[cfg(test)]
pub use client::MockNetworkLookup;
pub use types::{
    AutoRenewAttribute, CLIENT_TOKEN_MAX_LEN, ClusterParameter, ClusterSnapshot, ClusterStatus,
    ClusterSummary, CreateDbClusterRequest, CreateDbClusterResponse, DbClusterAttribute,
    DbClusterPage, DbNode, DescribeDbClustersRequest, ModifyAutoRenewRequest,
    ModifyParametersRequest, PeriodUnit, RenewalInfo, VSwitch, build_client_token,
};
pub use builder::build_create_request;
pub use poller::{StatePoller, WaitSpec};
pub use reader::AttributeReader;
pub use listing::{ClusterQuery, list_clusters};
