//! # Core Types Module
//!
//! The request and response shapes the gateway works with, independent of any
//! transport:
//!
//! - [`GatewayRequest`]: what a client asked for (method, path, query, headers, body)
//! - [`ServiceRequest`]: what a backend receives after routing (target path, extracted
//!   path parameters, principal)
//! - [`GatewayResponse`]: the uniform envelope returned for every outcome
//!
//! ## Envelopes
//!
//! Success: `{success: true, data, requestId, service, cached, timestamp}`
//!
//! Error: `{success: false, error: true, message, requestId, timestamp, details?}`
//!
//! Both carry the request ID and a timestamp so clients can correlate responses with
//! gateway logs. Errors never carry internal stack traces, only a message and
//! structured `details`.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::core::error::GatewayError;

/// Response header carrying the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Response header carrying the cache status (`HIT`, `MISS`, `BYPASS`)
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// An inbound request before routing
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Unique identifier for this request (for tracing and logging)
    pub id: String,

    /// HTTP method
    pub method: Method,

    /// Request path without the query string
    pub path: String,

    /// Decoded query parameters, kept sorted so the cache fingerprint is canonical
    pub query: BTreeMap<String, String>,

    /// Request headers
    pub headers: HeaderMap,

    /// JSON body, if any
    pub body: Option<Value>,
}

impl GatewayRequest {
    /// Create a request with a generated ID
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a request from a URI, splitting path and query
    pub fn from_uri(method: Method, uri: &Uri) -> Self {
        let mut request = Self::new(method, uri.path());
        if let Some(query) = uri.query() {
            request.query = parse_query(query);
        }
        request
    }

    /// Replace the generated ID (e.g. with an incoming `x-request-id`)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Parse a raw query string into decoded, sorted pairs.
///
/// Keys without a value (`?flag`) map to an empty string. Pairs that fail to decode
/// are dropped.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.replace('+', " ");
        let value = value.replace('+', " ");
        if let (Ok(key), Ok(value)) = (urlencoding::decode(&key), urlencoding::decode(&value)) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }

    params
}

/// The call a backend receives once a route has been resolved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub request_id: String,
    pub service: String,
    pub method: String,
    /// Target path with path parameters substituted
    pub path: String,
    pub path_params: HashMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Principal reported by the auth collaborator, for auth-required routes
    pub principal: Option<String>,
}

/// Whether a response came out of the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Served from the cache, no dispatch happened
    Hit,
    /// Route is cacheable but nothing was cached yet
    Miss,
    /// Route has no cache TTL
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessEnvelope<'a> {
    success: bool,
    data: Value,
    request_id: &'a str,
    service: &'a str,
    cached: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope<'a> {
    success: bool,
    error: bool,
    message: String,
    request_id: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Uniform gateway response
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Request ID echoed back to the client
    pub request_id: String,

    /// Cache outcome for this request
    pub cache_status: CacheStatus,

    /// Set on 429 responses
    pub retry_after_secs: Option<u64>,

    /// Envelope body
    pub body: Value,
}

impl GatewayResponse {
    /// Wrap a service payload in the success envelope
    pub fn success(request_id: &str, service: &str, data: Value, cache_status: CacheStatus) -> Self {
        let envelope = SuccessEnvelope {
            success: true,
            data,
            request_id,
            service,
            cached: cache_status == CacheStatus::Hit,
            timestamp: Utc::now(),
        };

        Self {
            status: StatusCode::OK,
            request_id: request_id.to_string(),
            cache_status,
            retry_after_secs: None,
            body: serde_json::to_value(envelope).unwrap_or(Value::Null),
        }
    }

    /// Convert an error into the error envelope
    pub fn error(request_id: &str, error: &GatewayError) -> Self {
        let envelope = ErrorEnvelope {
            success: false,
            error: true,
            message: error.to_string(),
            request_id,
            timestamp: Utc::now(),
            details: error_details(error),
        };

        Self {
            status: error.status_code(),
            request_id: request_id.to_string(),
            cache_status: CacheStatus::Bypass,
            retry_after_secs: error.retry_after_secs(),
            body: serde_json::to_value(envelope).unwrap_or(Value::Null),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The `data` field of a success envelope
    pub fn data(&self) -> Option<&Value> {
        self.body.get("data")
    }
}

/// Structured details for the error envelope
fn error_details(error: &GatewayError) -> Option<Value> {
    let details = match error {
        GatewayError::RouteNotFound { method, path } => json!({
            "type": error.error_type(),
            "method": method,
            "path": path,
        }),
        GatewayError::RateLimited {
            service,
            retry_after_secs,
        } => json!({
            "type": error.error_type(),
            "service": service,
            "retryAfter": retry_after_secs,
        }),
        GatewayError::CircuitOpen { service } => json!({
            "type": error.error_type(),
            "service": service,
            "circuitBreaker": "open",
        }),
        GatewayError::Backend { service, message } => json!({
            "type": error.error_type(),
            "service": service,
            "error": message,
        }),
        GatewayError::Timeout {
            service,
            timeout_ms,
        } => json!({
            "type": error.error_type(),
            "service": service,
            "timeoutMs": timeout_ms,
        }),
        _ => json!({ "type": error.error_type() }),
    };
    Some(details)
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        headers.insert(
            CACHE_STATUS_HEADER,
            HeaderValue::from_static(self.cache_status.as_str()),
        );
        if let Some(secs) = self.retry_after_secs {
            headers.insert(RETRY_AFTER, HeaderValue::from(secs));
        }

        (self.status, headers, Json(self.body)).into_response()
    }
}
