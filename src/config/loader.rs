//! Configuration Loader
//!
//! Environment-aware loading: `jobflow.toml` is the base, an optional
//! `jobflow.{env}.toml` overlays it, and `JOBFLOW__SECTION__KEY` environment
//! variables override both.

use super::error::{ConfigResult, ConfigurationError};
use super::JobflowConfig;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable selecting the overlay file
pub const ENVIRONMENT_VARIABLE: &str = "JOBFLOW_ENV";

const BASE_FILE: &str = "jobflow.toml";
const ENV_PREFIX: &str = "JOBFLOW";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug)]
pub struct ConfigManager {
    config: JobflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Like [`Self::load_from_directory_with_env`], reading variables from
    /// `variables` instead of the process environment when given
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound(config_directory));
        }

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "loading configuration"
        );

        let config = Self::build(&config_directory, environment, variables)?;
        config.validate()?;

        info!(
            environment = %environment,
            database = if config.database.url.is_some() { "postgres" } else { "memory" },
            max_connections = config.database.max_connections,
            workable_defaults = config.notifications.workable.len(),
            meta_defaults = config.notifications.meta.len(),
            "configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &JobflowConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Environment name from `JOBFLOW_ENV`, `development` when unset
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }

    fn build(
        directory: &Path,
        environment: &str,
        variables: Option<HashMap<String, String>>,
    ) -> ConfigResult<JobflowConfig> {
        let overlay = directory.join(format!("jobflow.{environment}.toml"));
        if overlay.exists() {
            debug!(path = %overlay.display(), "applying environment overlay");
        }

        let settings = Config::builder()
            .add_source(File::from(directory.join(BASE_FILE)).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(variables),
            )
            .build()?;

        settings
            .try_deserialize::<JobflowConfig>()
            .map_err(|error| ConfigurationError::DeserializationError {
                error: error.to_string(),
            })
    }
}
