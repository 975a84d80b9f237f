// ============================================================================
// Linting
// ============================================================================

#![warn(missing_docs)]                // All public items must be documented
#![warn(unused_imports)]
#![warn(unused_variables)]
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::cognitive_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # PolarDB provisioner
//!
//! Declarative, idempotent provisioning of PolarDB database clusters.
//!
//! ## Overview
//!
//! A YAML manifest describes the clusters that should exist. `polarctl`
//! compares it with the clusters recorded in the state file and with what
//! the control plane reports, then creates, converges, replaces or deletes
//! clusters until both sides agree.
//!
//! ## Architecture
//!
//! 1. **Desired state**: `polardb.deploy.yaml`, parsed into [`config::ClusterSpec`]
//! 2. **Observed state**: snapshots read through [`cloud::PolarDbApi`]
//! 3. **Reconciler**: drives one cluster through create, converge and delete
//! 4. **Planner**: turns the manifest-wide difference into ordered actions
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing, validation and hashing
//! - [`cloud`]: Control-plane client, request building, polling and reads
//! - [`reconciler`]: Single-cluster lifecycle and the convergence pipeline
//! - [`planner`]: Diff computation, plans and plan execution
//! - [`state`]: State storage backends (local, S3) and locking
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! provider:
//!   region: cn-hangzhou
//! state:
//!   backend: local
//! clusters:
//!   - name: orders
//!     db_type: MySQL
//!     db_version: "8.0"
//!     db_node_class: polar.mysql.x4.large
//!     vswitch_id: vsw-bp1example
//!     security_ips: ["10.0.0.0/8"]
//!     maintain_time: "16:00Z-17:00Z"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{NetworkLookup, PolarDbApi, PolarDbClient};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{ProvisionerError, Result};
pub use planner::{DeploymentPlan, DiffEngine, PlanExecutor};
pub use reconciler::Reconciler;
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
