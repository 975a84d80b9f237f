//! Configuration parser for loading manifests.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, ProvisionerError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::DeployConfig;

/// Environment variable holding the API token.
pub const API_TOKEN_VAR: &str = "POLARDB_API_TOKEN";

/// Configuration parser for loading manifests.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ProvisionerError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionerError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ProvisionerError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        for cluster in &config.clusters {
            if cluster.cluster_network_type.is_some() {
                warn!(
                    "Cluster '{}': 'cluster_network_type' is deprecated and ignored",
                    cluster.name
                );
            }
        }

        debug!(
            "Parsed {} cluster(s) for region {}",
            config.clusters.len(),
            config.provider.region
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables: `POLARDB_REGION`, `POLARDB_ENDPOINT`,
    /// `POLARDB_STATE_BUCKET` and `POLARDB_STATE_PREFIX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut DeployConfig) {
        if let Ok(region) = std::env::var("POLARDB_REGION") {
            debug!("Overriding provider.region from environment");
            config.provider.region = region;
        }

        if let Ok(endpoint) = std::env::var("POLARDB_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }

        if let Ok(bucket) = std::env::var("POLARDB_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Ok(prefix) = std::env::var("POLARDB_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ProvisionerError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the API token.
    ///
    /// The `POLARDB_API_TOKEN` variable wins; otherwise the first line of
    /// `<config dir>/polarctl/token` is used.
    ///
    /// # Errors
    ///
    /// Returns an error if no token is configured.
    pub fn get_api_token() -> Result<String> {
        if let Ok(token) = std::env::var(API_TOKEN_VAR)
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_string());
        }

        let token_file = dirs::config_dir().map(|dir| dir.join("polarctl").join("token"));
        if let Some(path) = token_file
            && let Ok(content) = std::fs::read_to_string(&path)
            && let Some(token) = content.lines().next().map(str::trim).filter(|t| !t.is_empty())
        {
            debug!("Using API token from {}", path.display());
            return Ok(token.to_string());
        }

        Err(ProvisionerError::Config(ConfigError::MissingEnvVar {
            name: API_TOKEN_VAR.to_string(),
        }))
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "polardb.deploy.yaml",
    "polardb.deploy.yml",
    "polardb.yaml",
    "polardb.yml",
];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ProvisionerError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
