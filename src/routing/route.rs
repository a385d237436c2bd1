//! # Route Definitions
//!
//! A [`Route`] maps an inbound `(method, path pattern)` to a target service together
//! with the policies the gateway enforces for it: auth, rate limit, timeout, retries,
//! circuit-breaker threshold and cache TTL.
//!
//! Path patterns are compiled once into a [`PathPattern`] at registration time.
//! A `{name}` segment matches exactly one non-empty path segment; every other segment
//! must match literally, and the segment counts must be equal.

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// How the route's target is reached; informational for the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    #[default]
    Internal,
    External,
    Proxy,
    Aggregate,
}

/// Route priority; higher priorities win when several routes share a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// HTTP method
    #[serde(with = "method_serde")]
    pub method: Method,

    /// Path pattern (e.g. `/stock/{symbol}`)
    pub path_pattern: String,

    /// Name of the service requests are dispatched to
    pub target_service: String,

    /// Path sent to the service; `{param}` placeholders are filled from the match.
    /// Defaults to the request path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,

    #[serde(default)]
    pub route_type: RouteType,

    #[serde(default)]
    pub priority: RoutePriority,

    /// Whether the auth collaborator must approve the request
    #[serde(default)]
    pub auth_required: bool,

    /// Admissions per rate-limit window for the target service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Upper bound on a single dispatch attempt
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Additional dispatch attempts after a retryable failure
    #[serde(default)]
    pub retry_count: u32,

    /// Consecutive failures that open the service's circuit
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Cache successful responses for this long; `None` disables caching
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<Duration>,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

/// Serialize a single HTTP method as its string form
mod method_serde {
    use axum::http::Method;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(method: &Method, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Method, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Method::from_str(&raw.to_uppercase()).map_err(serde::de::Error::custom)
    }
}

impl Route {
    /// Create a route with default policies
    pub fn new(method: Method, path_pattern: impl Into<String>, target_service: impl Into<String>) -> Self {
        Self {
            method,
            path_pattern: path_pattern.into(),
            target_service: target_service.into(),
            target_path: None,
            route_type: RouteType::default(),
            priority: RoutePriority::default(),
            auth_required: false,
            rate_limit: None,
            timeout: default_timeout(),
            retry_count: 0,
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            cache_ttl: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_target_path(mut self, target_path: impl Into<String>) -> Self {
        self.target_path = Some(target_path.into());
        self
    }

    pub fn with_type(mut self, route_type: RouteType) -> Self {
        self.route_type = route_type;
        self
    }

    pub fn with_priority(mut self, priority: RoutePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn with_rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Route table key, `METHOD:pattern`
    pub fn key(&self) -> String {
        route_key(&self.method, &self.path_pattern)
    }

    /// Check the route's policies and pattern
    pub fn validate(&self) -> GatewayResult<()> {
        PathPattern::parse(&self.path_pattern)?;

        if self.target_service.is_empty() {
            return Err(GatewayError::config(format!(
                "Route '{}' has empty target service",
                self.key()
            )));
        }
        if let Some(target) = &self.target_path {
            if !target.starts_with('/') {
                return Err(GatewayError::config(format!(
                    "Route '{}' target path must start with '/'",
                    self.key()
                )));
            }
        }
        if self.rate_limit == Some(0) {
            return Err(GatewayError::config(format!(
                "Route '{}' rate limit must be greater than 0",
                self.key()
            )));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::config(format!(
                "Route '{}' timeout must be greater than 0",
                self.key()
            )));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(GatewayError::config(format!(
                "Route '{}' circuit breaker threshold must be greater than 0",
                self.key()
            )));
        }
        if self.cache_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(GatewayError::config(format!(
                "Route '{}' cache TTL must be greater than 0",
                self.key()
            )));
        }

        Ok(())
    }

    /// The path sent to the backend for a request that matched this route
    pub fn target_path_for(&self, request_path: &str, params: &HashMap<String, String>) -> String {
        match &self.target_path {
            Some(template) => fill_placeholders(template, params),
            None => request_path.to_string(),
        }
    }
}

pub(crate) fn route_key(method: &Method, path: &str) -> String {
    format!("{}:{}", method, path)
}

/// Replace `{name}` placeholders; unknown names are left as written
fn fill_placeholders(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + close];
        out.push_str(&rest[..open]);
        match params.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..=open + close]),
        }
        rest = &rest[open + close + 1..];
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Precompiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

fn split_segments(path: &str) -> std::str::Split<'_, char> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

impl PathPattern {
    /// Compile a pattern such as `/users/{id}/orders`
    pub fn parse(pattern: &str) -> GatewayResult<Self> {
        if !pattern.starts_with('/') {
            return Err(GatewayError::config(format!(
                "Path pattern '{}' must start with '/'",
                pattern
            )));
        }

        let mut names = HashSet::new();
        let mut segments = Vec::new();

        for segment in split_segments(pattern) {
            let param = segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .filter(|name| !name.is_empty() && !name.contains(['{', '}']));

            match param {
                Some(name) => {
                    if !names.insert(name) {
                        return Err(GatewayError::config(format!(
                            "Path pattern '{}' repeats parameter '{}'",
                            pattern, name
                        )));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None if segment.contains(['{', '}']) => {
                    return Err(GatewayError::config(format!(
                        "Path pattern '{}' has malformed segment '{}'",
                        pattern, segment
                    )));
                }
                None => segments.push(Segment::Literal(segment.to_string())),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern has no parameters
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Number of leading literal segments
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Number of literal segments anywhere in the pattern
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Match a request path, returning the decoded parameters on success
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_segments(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    let value = urlencoding::decode(part)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| part.to_string());
                    params.insert(name.clone(), value);
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }
}
