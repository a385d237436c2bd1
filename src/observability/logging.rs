//! # Structured Logging
//!
//! `tracing` subscriber set-up. JSON output is the default for deployments; the
//! pretty format is meant for local runs. `RUST_LOG` takes precedence over the
//! configured level when set.

use serde::{Deserialize, Serialize};
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{GatewayError, GatewayResult};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(GatewayError::config(format!("Invalid log level: {}", self.level))),
        }
    }

    /// Default filter directives when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        let level = self.level.to_lowercase();
        format!("request_gateway={level},tower_http={level},warn")
    }
}

/// Install the global tracing subscriber.
///
/// Calling this twice is harmless: the second call logs a warning and returns `Ok`.
pub fn init_tracing(config: &LogConfig) -> GatewayResult<()> {
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directives()))
        .map_err(|e| GatewayError::config(format!("Invalid log filter: {}", e)))?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
    Ok(())
}
