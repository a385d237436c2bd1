//! # Configuration Module
//!
//! Start-up configuration for the gateway binary.
//!
//! ## Key Features
//! - YAML parsing with serde; durations use humantime (`"60s"`, `"5m"`)
//! - Every section has defaults, so a minimal file only lists services and routes
//! - Environment variable overrides (`GATEWAY_*`)
//! - Validation that collects every problem before failing
//!
//! The library itself never reads configuration implicitly: [`Gateway::from_config`]
//! consumes a validated [`GatewayConfig`], and everything can also be built
//! programmatically.
//!
//! [`Gateway::from_config`]: crate::gateway::Gateway::from_config

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::logging::LogConfig;
use crate::routing::Route;

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Request-path policy timings
    pub gateway: GatewaySettings,

    /// Response cache backend
    pub cache: CacheConfig,

    /// Log level and format
    pub logging: LogConfig,

    /// Static API keys
    pub auth: AuthConfig,

    /// Backend services by name
    pub services: HashMap<String, ServiceConfig>,

    /// Route definitions, registered in file order
    pub routes: Vec<Route>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply env overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without overrides or validation
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides
    ///
    /// Recognised variables: `GATEWAY_SERVER_PORT`, `GATEWAY_BIND_ADDRESS`,
    /// `GATEWAY_LOG_LEVEL`, `GATEWAY_REDIS_URL`, `GATEWAY_HEALTH_CHECK_INTERVAL`.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Ok(addr) = env::var("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            self.cache.backend = CacheBackendKind::Redis;
            self.cache.redis_url = Some(url);
        }

        if let Ok(interval) = env::var("GATEWAY_HEALTH_CHECK_INTERVAL") {
            self.gateway.health_check_interval = humantime::parse_duration(&interval).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_HEALTH_CHECK_INTERVAL: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the whole configuration, reporting every problem at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }
        if self.server.max_body_size == 0 {
            errors.push("server.max_body_size must be greater than 0".to_string());
        }
        if self.server.metrics_port == Some(self.server.port) {
            errors.push("server.metrics_port must differ from server.port".to_string());
        }

        let timings = [
            ("rate_limit_window", self.gateway.rate_limit_window),
            ("health_check_interval", self.gateway.health_check_interval),
            ("probe_timeout", self.gateway.probe_timeout),
            ("metrics_rollup_interval", self.gateway.metrics_rollup_interval),
            ("cleanup_interval", self.gateway.cleanup_interval),
            ("circuit_breaker_cooldown", self.gateway.circuit_breaker_cooldown),
        ];
        for (name, value) in timings {
            if value.is_zero() {
                errors.push(format!("gateway.{} must be greater than 0", name));
            }
        }

        if self.cache.max_entries == 0 {
            errors.push("cache.max_entries must be greater than 0".to_string());
        }
        if self.cache.backend == CacheBackendKind::Redis {
            match self.cache.redis_url.as_deref() {
                None | Some("") => errors.push("cache.redis_url is required for the redis backend".to_string()),
                Some(raw) => {
                    if let Err(e) = Url::parse(raw) {
                        errors.push(format!("cache.redis_url is not a valid URL: {}", e));
                    }
                }
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e.to_string());
        }

        for (key, principal) in &self.auth.api_keys {
            if key.is_empty() || principal.is_empty() {
                errors.push("auth.api_keys entries need a non-empty key and principal".to_string());
            }
        }

        for (name, service) in &self.services {
            if service.instances.is_empty() {
                errors.push(format!("Service '{}' has no instances", name));
            }
            for instance in &service.instances {
                match Url::parse(instance) {
                    Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                    Ok(url) => errors.push(format!(
                        "Service '{}' instance '{}' has unsupported scheme '{}'",
                        name,
                        instance,
                        url.scheme()
                    )),
                    Err(e) => errors.push(format!(
                        "Service '{}' instance '{}' is not a valid URL: {}",
                        name, instance, e
                    )),
                }
            }
            if !service.health_path.starts_with('/') {
                errors.push(format!("Service '{}' health_path must start with '/'", name));
            }
        }

        for (index, route) in self.routes.iter().enumerate() {
            if let Err(e) = route.validate() {
                errors.push(format!("Route {}: {}", index, e));
            }
            if !self.services.contains_key(&route.target_service) {
                errors.push(format!(
                    "Route '{} {}' references unknown service '{}'",
                    route.method, route.path_pattern, route.target_service
                ));
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Port for the Prometheus exporter, disabled when absent
    pub metrics_port: Option<u16>,

    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: None,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Timings for the request-path policies and background loops
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Sliding window for per-service rate limits
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,

    /// Delay between health probe rounds
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Upper bound on a single health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// How often requests-per-minute is recomputed
    #[serde(with = "humantime_serde")]
    pub metrics_rollup_interval: Duration,

    /// How often expired rate-limit timestamps and cache entries are purged
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// How long an open circuit waits before letting a probe through
    #[serde(with = "humantime_serde")]
    pub circuit_breaker_cooldown: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            metrics_rollup_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// Which [`CacheStore`](crate::caching::CacheStore) backs the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,

    /// Entry cap for the in-memory store
    pub max_entries: usize,

    /// Connection URL for the redis store
    pub redis_url: Option<String>,

    /// Prefix for every key the gateway writes
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            max_entries: 10_000,
            redis_url: None,
            key_prefix: "gateway:".to_string(),
        }
    }
}

/// Static API key authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API key -> principal
    pub api_keys: HashMap<String, String>,
}

/// A backend service reachable over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URLs, dispatched round-robin
    pub instances: Vec<String>,

    /// Path probed by the health monitor
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}
