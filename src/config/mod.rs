//! # Jobflow Configuration
//!
//! Engine configuration, loaded by [`ConfigManager`] from TOML files and
//! `JOBFLOW__`-prefixed environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use jobflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let defaults = manager.config().default_actions();
//! let pool_size = manager.config().database.max_connections;
//! # Ok(())
//! # }
//! ```
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration.

pub mod error;
pub mod loader;

use crate::constants::DEFAULT_WEBSOCKET_CAPACITY;
use crate::models::ActionSpec;
use crate::state_machine::DefaultActions;
use serde::{Deserialize, Serialize};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobflowConfig {
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection url; unset means the in-memory store
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Actions installed on every new workable job
    pub workable: Vec<ActionSpec>,
    /// Actions installed on every new meta-job
    pub meta: Vec<ActionSpec>,
    pub websocket_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            workable: Vec::new(),
            meta: Vec::new(),
            websocket_capacity: DEFAULT_WEBSOCKET_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl JobflowConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "url",
                    "database (remove the key to use the in-memory store)",
                ));
            }
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(ConfigurationError::invalid_value(
                    "database.url",
                    url,
                    "expected a postgres:// url",
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                "must be greater than 0",
            ));
        }

        if self.notifications.websocket_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "notifications.websocket_capacity",
                self.notifications.websocket_capacity,
                "must be greater than 0",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "level", "logging",
            ));
        }
        Ok(())
    }

    /// Notification actions the engine installs on new jobs
    pub fn default_actions(&self) -> DefaultActions {
        DefaultActions {
            workable: self.notifications.workable.clone(),
            meta: self.notifications.meta.clone(),
        }
    }
}
