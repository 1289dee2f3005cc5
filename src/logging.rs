//! # Structured Logging
//!
//! Environment-aware `tracing` setup. `RUST_LOG` wins when set; otherwise the
//! configured level applies, falling back to a per-environment default.

use crate::config::loader::ENVIRONMENT_VARIABLE;
use crate::config::LoggingConfig;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize logging with the environment's default level
pub fn init_structured_logging() {
    let environment = get_environment();
    init_logging(&LoggingConfig {
        level: default_log_level(&environment).to_string(),
        json: false,
    });
}

/// Initialize logging from configuration. Later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
        };

        let console = if config.json {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(environment != "production")
                .with_filter(filter())
                .boxed()
        };

        // Another subscriber may already be installed, e.g. by an embedding host
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }

        tracing::info!(
            environment = %environment,
            level = %config.level,
            json = config.json,
            "structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}
