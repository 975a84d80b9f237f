//! Configuration module for the PolarDB provisioner.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `polardb.deploy.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    BillingTerm, ClusterSpec, DeployConfig, EffectiveTime, LOCALHOST_IP, ParameterSpec, PayType,
    ProviderConfig, RenewalPolicy, RenewalStatus, StateBackend, StateConfig, TimeoutsConfig,
    WaitSettings,
};
pub use parser::{API_TOKEN_VAR, ConfigParser, find_config_file};
pub use validator::{
    ConfigValidator, MULTI_ZONE_SYMBOL, VALID_AUTO_RENEW_PERIODS, VALID_PERIODS, ValidationError, ValidationResult,
    multi_zone_suffixes,
};
pub use hash::ConfigHasher;
