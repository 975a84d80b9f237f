//! Error types for the PolarDB provisioner.
//!
//! This module provides the error hierarchy for every stage of a cluster's
//! lifecycle: configuration, state management, the control-plane API,
//! state polling and reconciliation. It also owns the closed classification
//! of remote error codes used to decide what may be retried.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the provisioner.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Control-plane API errors.
    #[error("PolarDB API error: {0}")]
    Cloud(#[from] CloudApiError),

    /// Wait-for-state errors.
    #[error("Wait error: {0}")]
    Wait(#[from] WaitError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate cluster name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// The vswitch does not live in the requested zone.
    #[error("The specified vswitch {vswitch_id} isn't in the zone {zone_id}")]
    ZoneMismatch {
        /// Vswitch that was resolved.
        vswitch_id: String,
        /// Zone that was requested.
        zone_id: String,
    },

    /// The vswitch zone is not one of the zones of a multi-zone token.
    #[error("The specified vswitch {vswitch_id} isn't in the multi zone {zone_id}")]
    MultiZoneMismatch {
        /// Vswitch that was resolved.
        vswitch_id: String,
        /// Multi-zone identifier that was requested.
        zone_id: String,
    },

    /// A purchase duration cannot be expressed in months or whole years.
    #[error("Invalid duration of {months} months: durations above 9 months must be whole years")]
    InvalidPeriod {
        /// Requested duration in months.
        months: u32,
    },

    /// A field that can only be set at creation time was changed.
    #[error("Field '{field}' cannot be changed after creation ({current} -> {desired}); the cluster must be replaced")]
    ImmutableField {
        /// Name of the immutable field.
        field: String,
        /// Value observed on the remote cluster.
        current: String,
        /// Value requested by the configuration.
        desired: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Control-plane API errors.
#[derive(Debug, Error)]
pub enum CloudApiError {
    /// The control plane rejected the call with an error code.
    #[error("{action} failed: [{code}] {message} (request id: {request_id})")]
    Api {
        /// Name of the remote operation.
        action: String,
        /// Machine-readable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Request id reported by the control plane.
        request_id: String,
    },

    /// Authentication failed.
    #[error("PolarDB authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Rate limited.
    #[error("PolarDB API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with PolarDB: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from PolarDB API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Errors raised while waiting for a cluster to reach a state.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The cluster entered a state from which the target is unreachable.
    #[error("Cluster {id} entered failure state {status} after {polls} polls")]
    Terminal {
        /// Cluster id.
        id: String,
        /// Observed failure status.
        status: String,
        /// Number of polls performed.
        polls: u32,
    },

    /// The deadline passed before the target state was observed.
    #[error("Timeout after {waited:?} and {polls} polls waiting for cluster {id} to reach {target} (last status: {last_status})")]
    Timeout {
        /// Cluster id.
        id: String,
        /// Target states, comma separated.
        target: String,
        /// Last status observed before the deadline.
        last_status: String,
        /// Number of polls performed.
        polls: u32,
        /// How long the poller waited.
        waited: Duration,
    },

    /// The cluster reported a status that is neither pending, target nor failure.
    #[error("Cluster {id} is in unexpected state {status}")]
    UnexpectedState {
        /// Cluster id.
        id: String,
        /// Observed status.
        status: String,
    },

    /// The cluster could not be found while waiting.
    #[error("Cluster {id} not found after {checks} checks")]
    NotFound {
        /// Cluster id.
        id: String,
        /// Consecutive not-found observations.
        checks: u32,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A convergence step failed; later steps were not attempted.
    #[error("Failed to apply '{step}' to cluster {resource_id}: {source}")]
    StepFailed {
        /// Cluster id.
        resource_id: String,
        /// Name of the failing step.
        step: String,
        /// Underlying failure.
        #[source]
        source: Box<ProvisionerError>,
    },

    /// The cluster is prepaid and can only be released by expiry.
    #[error("Cluster {resource_id} is Prepaid and cannot be deleted; it is released automatically when it expires")]
    PermanentDeletion {
        /// Cluster id.
        resource_id: String,
    },

    /// Deletion kept hitting transient status conflicts until the deadline.
    #[error("Deleting cluster {resource_id} did not succeed within {waited:?} ({attempts} attempts): {last_error}")]
    DeleteTimedOut {
        /// Cluster id.
        resource_id: String,
        /// Number of delete calls issued.
        attempts: u32,
        /// Time spent retrying.
        waited: Duration,
        /// Last retryable error seen.
        last_error: String,
    },

    /// The cluster disappeared while it was being updated.
    #[error("Cluster {resource_id} no longer exists")]
    ResourceGone {
        /// Cluster id.
        resource_id: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// Error codes meaning the cluster does not exist.
pub const NOT_FOUND_CODES: &[&str] = &[
    "InvalidDBClusterId.NotFound",
    "InvalidDBClusterName.NotFound",
];

/// Error codes meaning the cluster is busy; the call may succeed later.
pub const TRANSIENT_STATUS_CODES: &[&str] = &[
    "OperationDenied.DBClusterStatus",
    "OperationDenied.PolarDBClusterStatus",
    "OperationDenied.ReadPolarDBClusterStatus",
];

/// Classification of a remote error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient conflict, the same call may be retried.
    Retryable,
    /// Anything else.
    Fatal,
    /// The target does not exist.
    NotFound,
}

/// Classifies a control-plane error code.
#[must_use]
pub fn classify_remote_error(code: &str) -> ErrorClass {
    if NOT_FOUND_CODES.contains(&code) {
        ErrorClass::NotFound
    } else if TRANSIENT_STATUS_CODES.contains(&code) {
        ErrorClass::Retryable
    } else {
        ErrorClass::Fatal
    }
}

impl ProvisionerError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the remote error code, if this error came from the control plane.
    #[must_use]
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Cloud(err) => err.code(),
            _ => None,
        }
    }

    /// Classifies this error for retry decisions.
    ///
    /// Only control-plane errors carrying a code can be retryable or not-found.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.remote_code()
            .map_or(ErrorClass::Fatal, classify_remote_error)
    }

    /// Returns true if this error means the cluster does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Returns true if the HTTP transport should retry the request.
    #[must_use]
    pub const fn is_transport_retryable(&self) -> bool {
        matches!(
            self,
            Self::Cloud(CloudApiError::RateLimited { .. } | CloudApiError::NetworkError { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl CloudApiError {
    /// Creates an API error from a control-plane error body.
    #[must_use]
    pub fn api(
        action: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self::Api {
            action: action.into(),
            code: code.into(),
            message: message.into(),
            request_id: request_id.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns the machine-readable error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        assert_eq!(
            classify_remote_error("InvalidDBClusterId.NotFound"),
            ErrorClass::NotFound
        );
        assert_eq!(
            classify_remote_error("InvalidDBClusterName.NotFound"),
            ErrorClass::NotFound
        );
    }

    #[test]
    fn test_classify_transient_status() {
        for code in TRANSIENT_STATUS_CODES {
            assert_eq!(classify_remote_error(code), ErrorClass::Retryable);
        }
    }

    #[test]
    fn test_classify_everything_else_fatal() {
        assert_eq!(classify_remote_error("Forbidden.RAM"), ErrorClass::Fatal);
        assert_eq!(classify_remote_error(""), ErrorClass::Fatal);
    }

    #[test]
    fn test_error_class_of_non_remote_error() {
        let err = ProvisionerError::internal("boom");
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!err.is_not_found());

        let err = ProvisionerError::from(CloudApiError::network("reset"));
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.is_transport_retryable());
    }

    #[test]
    fn test_lock_errors_are_not_transport_retryable() {
        let err = ProvisionerError::from(StateError::LockFailed {
            message: String::from("lock file busy"),
        });

        assert!(!err.is_transport_retryable());
    }

    #[test]
    fn test_remote_code_passthrough() {
        let err = ProvisionerError::from(CloudApiError::api(
            "DeleteDBCluster",
            "OperationDenied.DBClusterStatus",
            "busy",
            "req-1",
        ));
        assert_eq!(err.remote_code(), Some("OperationDenied.DBClusterStatus"));
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert!(err.to_string().contains("DeleteDBCluster"));
    }
}
