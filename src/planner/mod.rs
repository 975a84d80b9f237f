//! Planning module for deployment operations.
//!
//! This module compares the manifest with the observed clusters and turns
//! the difference into an ordered plan that the executor applies.

mod diff;
mod plan;
mod executor;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, DriftReport, ResourceDiff, observe};
pub use plan::{ActionType, DeploymentPlan, PlannedAction};
pub use executor::{ActionResult, ExecutionResult, PlanExecutor};
