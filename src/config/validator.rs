//! Configuration validation for manifests.
//!
//! This module validates manifests before anything is sent to the control
//! plane: every value is checked against its allow-list and cross-field
//! constraints so that bad input fails fast and is never retried.

use crate::error::{ConfigError, ProvisionerError, Result};
use std::collections::HashSet;
use tracing::debug;
use validator::Validate;

use super::spec::{ClusterSpec, DeployConfig, PayType, StateBackend, StateConfig};

/// Valid purchase durations in months.
pub const VALID_PERIODS: &[u32] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 12, 24, 36];

/// Valid automatic renewal durations in months.
pub const VALID_AUTO_RENEW_PERIODS: &[u32] = &[1, 2, 3, 6, 12];

/// Marker of a multi-zone identifier, e.g. `cn-hangzhou-MAZ6(b,f)`.
pub const MULTI_ZONE_SYMBOL: &str = "MAZ";

/// Validator for manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if config.provider.region.trim().is_empty() {
            result.push_error("provider.region", "Region cannot be empty");
        }
        Self::validate_state(&config.state, &mut result);
        Self::validate_clusters(&config.clusters, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ProvisionerError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates a single cluster outside of a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate_cluster(&self, cluster: &ClusterSpec) -> Result<()> {
        let mut result = ValidationResult::default();
        Self::check_cluster(cluster, &cluster.name, &mut result);

        match result.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(ConfigError::validation(first.message, first.field).into()),
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_deref().is_none_or(str::is_empty) {
                    result.push_error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {}
        }
    }

    /// Validates all cluster specs.
    fn validate_clusters(clusters: &[ClusterSpec], result: &mut ValidationResult) {
        if clusters.is_empty() {
            result
                .warnings
                .push(String::from("No clusters defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();

        for (i, cluster) in clusters.iter().enumerate() {
            let prefix = format!("clusters[{i}]");

            if !seen_names.insert(cluster.name.as_str()) {
                result.push_error(
                    format!("{prefix}.name"),
                    format!("Duplicate cluster name: {}", cluster.name),
                );
            }

            Self::check_cluster(cluster, &prefix, result);
        }
    }

    /// Runs every per-cluster check.
    fn check_cluster(cluster: &ClusterSpec, prefix: &str, result: &mut ValidationResult) {
        if !is_valid_name(&cluster.name) {
            result.push_error(
                format!("{prefix}.name"),
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    cluster.name
                ),
            );
        }

        for (field, value) in [
            ("db_type", &cluster.db_type),
            ("db_version", &cluster.db_version),
            ("db_node_class", &cluster.db_node_class),
        ] {
            if value.trim().is_empty() {
                result.push_error(format!("{prefix}.{field}"), format!("'{field}' is required"));
            }
        }

        if cluster.validate().is_err() {
            result.push_error(
                format!("{prefix}.description"),
                "Description must be between 2 and 256 characters",
            );
        }

        if !VALID_PERIODS.contains(&cluster.period) {
            result.push_error(
                format!("{prefix}.period"),
                format!(
                    "Period {} is not one of {VALID_PERIODS:?}",
                    cluster.period
                ),
            );
        }

        if !VALID_AUTO_RENEW_PERIODS.contains(&cluster.auto_renew_period) {
            result.push_error(
                format!("{prefix}.auto_renew_period"),
                format!(
                    "Auto renew period {} is not one of {VALID_AUTO_RENEW_PERIODS:?}",
                    cluster.auto_renew_period
                ),
            );
        }

        if let Some(zone) = cluster.zone()
            && zone.contains(MULTI_ZONE_SYMBOL)
            && multi_zone_suffixes(zone).is_none()
        {
            result.push_error(
                format!("{prefix}.zone_id"),
                format!("Multi-zone id '{zone}' must list its zones in parentheses"),
            );
        }

        let mut parameter_names = HashSet::new();
        for (i, parameter) in cluster.parameters.iter().enumerate() {
            if parameter.name.trim().is_empty() {
                result.push_error(
                    format!("{prefix}.parameters[{i}].name"),
                    "Parameter name cannot be empty",
                );
            } else if !parameter_names.insert(parameter.name.as_str()) {
                result.push_error(
                    format!("{prefix}.parameters[{i}].name"),
                    format!("Duplicate parameter: {}", parameter.name),
                );
            }
        }

        if let Some(ips) = &cluster.security_ips
            && ips.iter().any(|ip| ip.trim() == "0.0.0.0/0")
        {
            result.warnings.push(format!(
                "{prefix}.security_ips allows connections from any address"
            ));
        }

        if cluster.cluster_network_type.is_some() {
            result.warnings.push(format!(
                "{prefix}.cluster_network_type is deprecated and ignored"
            ));
        }

        if cluster.pay_type == PayType::Postpaid && cluster.auto_renew {
            result.warnings.push(format!(
                "{prefix}.auto_renew only applies to Prepaid clusters"
            ));
        }
    }
}

/// Extracts the zone suffixes of a multi-zone identifier.
///
/// `cn-hangzhou-MAZ6(b,f)` yields `"b,f"`.
#[must_use]
pub fn multi_zone_suffixes(zone: &str) -> Option<&str> {
    let (_, rest) = zone.split_once('(')?;
    let (inner, _) = rest.split_once(')')?;
    Some(inner)
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if chars.any(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Records an error.
    fn push_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
