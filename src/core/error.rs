//! # Error Handling Module
//!
//! Every way a request can fail inside the gateway is a variant of [`GatewayError`].
//! The request handler converts each variant into the uniform error envelope, so no
//! error ever escapes to the transport layer.
//!
//! ## Taxonomy
//!
//! | Variant            | Status | Feeds the circuit breaker |
//! |--------------------|--------|---------------------------|
//! | `RouteNotFound`    | 404    | no                        |
//! | `Unauthenticated`  | 401    | no                        |
//! | `RateLimited`      | 429    | no                        |
//! | `CircuitOpen`      | 503    | no (fast-fail)            |
//! | `Backend`          | 500    | yes                       |
//! | `Timeout`          | 500    | yes                       |
//! | `Internal`         | 500    | yes                       |
//!
//! The remaining variants (`Configuration`, `Cache`, `Io`, ...) come from start-up
//! and collaborator code. They are converted with `From` so `?` works across the
//! crate boundary the way it does for `std::io::Error`.

use axum::http::StatusCode;
use thiserror::Error;

use crate::caching::CacheError;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the request gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No registered route matches the method and path
    #[error("No route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// The auth collaborator rejected the request
    #[error("Authentication failed: {reason}")]
    Unauthenticated { reason: String },

    /// The service's sliding window is full
    #[error("Rate limit exceeded for service: {service}")]
    RateLimited { service: String, retry_after_secs: u64 },

    /// The service's circuit breaker is open, the request was not dispatched
    #[error("Circuit breaker open for service: {service}")]
    CircuitOpen { service: String },

    /// The backend returned an error or could not be reached
    #[error("Backend error from {service}: {message}")]
    Backend { service: String, message: String },

    /// The backend did not answer within the route's timeout
    #[error("Request to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    /// Unexpected failure inside the gateway itself
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// Invalid configuration or route definition
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Cache backend failure
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// I/O errors (config files, sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when calling an upstream instance
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn unauthenticated<S: Into<String>>(reason: S) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }

    /// Create a backend error for the given service
    pub fn backend<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Backend {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code returned to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Backend { .. }
            | Self::Timeout { .. }
            | Self::Internal { .. }
            | Self::Configuration { .. }
            | Self::Cache { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::Yaml { .. }
            | Self::HttpClient { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name, used in logs and the envelope `details`
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Backend { .. } => "backend_error",
            Self::Timeout { .. } => "backend_timeout",
            Self::Internal { .. } => "internal_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Cache { .. } => "cache_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }

    /// Whether another dispatch attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::HttpClient { .. }
        )
    }

    /// Whether this outcome counts as a failure of the target service.
    ///
    /// Client-side and policy rejections (404, 401, 429) and the circuit breaker's
    /// own fast-fail never count. Dispatch rewraps any other error a backend returns
    /// as `Backend`.
    pub fn counts_as_service_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. } | Self::Timeout { .. } | Self::Internal { .. } | Self::HttpClient { .. }
        )
    }

    /// Seconds the client should wait before retrying, for rate-limit rejections
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        Self::Cache {
            message: err.to_string(),
        }
    }
}
