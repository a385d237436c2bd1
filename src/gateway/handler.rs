//! # Gateway Orchestrator
//!
//! [`Gateway`] owns every per-process registry (routes, circuit breakers, rate
//! windows, health records, metrics) and runs the request lifecycle:
//!
//! ```text
//! resolve ─► auth ─► rate check ─► breaker ─► cache ─► admit ─► dispatch ─► record ─► store
//!    │         │          │           │          │        │          │
//!   404       401        429         503        HIT      429       500
//! ```
//!
//! Every outcome becomes a [`GatewayResponse`]; nothing escapes [`Gateway::handle`].
//! A cache hit short-circuits before admission, so it consumes no rate-limit slot
//! and leaves the circuit breaker untouched; if it was granted the half-open probe,
//! the probe is handed back. Every dispatch error counts against the breaker.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::{ApiKeyAuthProvider, AuthProvider, DenyAllAuthProvider};
use crate::caching::{CacheStore, InMemoryCache, RedisCache, ResponseCache, ResponseCacheStats};
use crate::core::clock::{system_clock, SharedClock};
use crate::core::config::{CacheBackendKind, GatewayConfig, GatewaySettings};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{CacheStatus, GatewayRequest, GatewayResponse, ServiceRequest};
use crate::discovery::{DiscoveredService, HttpBackend, ServiceRegistry, ServiceSummary, SharedBackend};
use crate::observability::{GatewayMetrics, HealthMonitor, HealthTracker, MetricsCollector, ServiceHealth};
use crate::routing::{Route, RoutePriority, RouteTable};
use crate::traffic::{Admission, CircuitBreakerRegistry, CircuitBreakerSnapshot, RateLimitDecision, RateLimitSnapshot, RateLimiter};

use super::maintenance::BackgroundTasks;

const DEFAULT_CACHE_ENTRIES: usize = 10_000;
const DEFAULT_CACHE_PREFIX: &str = "gateway:";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Any error a backend returns is a backend failure from the client's point of view
fn as_dispatch_failure(service: &str, error: GatewayError) -> GatewayError {
    if error.counts_as_service_failure() {
        error
    } else {
        GatewayError::backend(service, error.to_string())
    }
}

/// A successfully served request
struct Served {
    service: String,
    data: Value,
    cache_status: CacheStatus,
}

/// Operator view of the whole gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub gateway_info: GatewayInfo,
    pub metrics: GatewayMetrics,
    pub health: BTreeMap<String, ServiceHealth>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub rate_limits: Vec<RateLimitSnapshot>,
    pub routes: Vec<RouteSummary>,
    pub services: Vec<ServiceSummary>,
    pub cache: ResponseCacheStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub route_count: usize,
    pub cache_backend: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub method: String,
    pub path_pattern: String,
    pub target_service: String,
    pub priority: RoutePriority,
    pub auth_required: bool,
    pub rate_limit: Option<u32>,
    pub cache_ttl_secs: Option<u64>,
}

impl From<&Route> for RouteSummary {
    fn from(route: &Route) -> Self {
        Self {
            method: route.method.to_string(),
            path_pattern: route.path_pattern.clone(),
            target_service: route.target_service.clone(),
            priority: route.priority,
            auth_required: route.auth_required,
            rate_limit: route.rate_limit,
            cache_ttl_secs: route.cache_ttl.map(|ttl| ttl.as_secs()),
        }
    }
}

/// Liveness report: the gateway itself plus the last known state of each service
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub gateway: &'static str,
    pub services: BTreeMap<String, ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    settings: GatewaySettings,
    clock: Option<SharedClock>,
    store: Option<Arc<dyn CacheStore>>,
    cache_prefix: String,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            settings: GatewaySettings::default(),
            clock: None,
            store: None,
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            auth: None,
        }
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(mut self, settings: GatewaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Time source for rate windows, cooldowns and cache TTLs
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = prefix.into();
        self
    }

    pub fn auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn build(self) -> Gateway {
        let clock = self.clock.unwrap_or_else(system_clock);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCache::with_clock(DEFAULT_CACHE_ENTRIES, clock.clone())));
        let auth = self.auth.unwrap_or_else(|| Arc::new(DenyAllAuthProvider));

        Gateway {
            routes: RouteTable::new(),
            registry: Arc::new(ServiceRegistry::new()),
            limiter: Arc::new(RateLimiter::new(self.settings.rate_limit_window, clock.clone())),
            breakers: CircuitBreakerRegistry::new(self.settings.circuit_breaker_cooldown, clock.clone()),
            cache: Arc::new(ResponseCache::new(store, self.cache_prefix)),
            auth,
            health: Arc::new(HealthTracker::new()),
            metrics: Arc::new(MetricsCollector::new(clock)),
            settings: self.settings,
            started_at: Utc::now(),
        }
    }
}

/// The request gateway
pub struct Gateway {
    routes: RouteTable,
    registry: Arc<ServiceRegistry>,
    limiter: Arc<RateLimiter>,
    breakers: CircuitBreakerRegistry,
    cache: Arc<ResponseCache>,
    auth: Arc<dyn AuthProvider>,
    health: Arc<HealthTracker>,
    metrics: Arc<MetricsCollector>,
    settings: GatewaySettings,
    started_at: DateTime<Utc>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build a gateway with HTTP backends, the configured cache store and auth
    pub async fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackendKind::Memory => Arc::new(InMemoryCache::new(config.cache.max_entries)),
            CacheBackendKind::Redis => {
                let url = config
                    .cache
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| GatewayError::config("cache.redis_url is required for the redis backend"))?;
                Arc::new(RedisCache::connect(url).await?)
            }
        };

        let auth: Arc<dyn AuthProvider> = if config.auth.api_keys.is_empty() {
            Arc::new(DenyAllAuthProvider)
        } else {
            Arc::new(ApiKeyAuthProvider::new(config.auth.api_keys.clone()))
        };

        let gateway = Self::builder()
            .settings(config.gateway.clone())
            .cache_store(store)
            .cache_prefix(config.cache.key_prefix.clone())
            .auth_provider(auth)
            .build();

        let client = HttpBackend::default_client(config.gateway.probe_timeout)?;
        for (name, service) in &config.services {
            let instances = service
                .instances
                .iter()
                .map(|url| {
                    HttpBackend::new(name.as_str(), url, service.health_path.as_str(), client.clone())
                        .map(|backend| Arc::new(backend) as SharedBackend)
                })
                .collect::<GatewayResult<Vec<_>>>()?;
            gateway.register_instances(name, instances);
        }

        for route in &config.routes {
            gateway.register_route(route.clone())?;
        }

        info!(
            routes = gateway.routes.len(),
            services = config.services.len(),
            cache_backend = gateway.cache.backend(),
            "Gateway built from configuration"
        );
        Ok(gateway)
    }

    /// Register a route and initialise the per-service state it needs
    pub fn register_route(&self, route: Route) -> GatewayResult<Arc<Route>> {
        let route = self.routes.register(route)?;
        let service = route.target_service.as_str();

        self.health.ensure(service);
        self.breakers.get_or_create(service, route.circuit_breaker_threshold);
        if let Some(limit) = route.rate_limit {
            self.limiter.configure(service, limit);
        }

        info!(
            route = %route.key(),
            service = %service,
            priority = ?route.priority,
            "Registered route"
        );
        Ok(route)
    }

    pub fn register_service(&self, service: &str, backend: SharedBackend) {
        self.registry.register(service, backend);
    }

    pub fn register_instances(&self, service: &str, instances: Vec<SharedBackend>) {
        self.registry.register_instances(service, instances);
    }

    pub fn discover(&self, services: Vec<DiscoveredService>) -> usize {
        self.registry.discover(services)
    }

    /// Run one request through the gateway
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let started = Instant::now();
        let _guard = self
            .metrics
            .begin_request(&request.id, request.method.as_str(), &request.path);

        debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            "Handling request"
        );

        match self.process(&request).await {
            Ok(served) => {
                let latency = started.elapsed();
                self.metrics.record_success(latency);
                debug!(
                    request_id = %request.id,
                    service = %served.service,
                    cache = %served.cache_status,
                    latency_ms = latency.as_millis() as u64,
                    "Request served"
                );
                GatewayResponse::success(&request.id, &served.service, served.data, served.cache_status)
            }
            Err(e) => {
                self.record_rejection(&e, started.elapsed());
                GatewayResponse::error(&request.id, &e)
            }
        }
    }

    fn record_rejection(&self, error: &GatewayError, latency: Duration) {
        match error {
            GatewayError::Unauthenticated { .. } => self.metrics.record_auth_failure(),
            GatewayError::RateLimited { .. } => self.metrics.record_rate_limited(),
            GatewayError::CircuitOpen { .. } => self.metrics.record_circuit_open(),
            _ => self.metrics.record_failure(latency),
        }
    }

    async fn process(&self, request: &GatewayRequest) -> GatewayResult<Served> {
        let matched = self.routes.resolve(&request.method, &request.path).ok_or_else(|| {
            debug!(request_id = %request.id, method = %request.method, path = %request.path, "No route");
            GatewayError::RouteNotFound {
                method: request.method.to_string(),
                path: request.path.clone(),
            }
        })?;
        let route = matched.route.clone();
        let service = route.target_service.as_str();

        let principal = if route.auth_required {
            let outcome = self.auth.check_auth(request).await;
            if !outcome.ok {
                let reason = outcome.error.unwrap_or_else(|| "access denied".to_string());
                warn!(request_id = %request.id, route = %route.key(), reason = %reason, "Authentication failed");
                return Err(GatewayError::unauthenticated(reason));
            }
            outcome.principal
        } else {
            None
        };

        self.ensure_capacity(service, self.limiter.check(service), &request.id)?;

        let breaker = self.breakers.get_or_create(service, route.circuit_breaker_threshold);
        let admission = breaker.admission();
        if admission == Admission::Rejected {
            warn!(request_id = %request.id, service = %service, "Circuit open, failing fast");
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
            });
        }
        // A probe that ends before dispatch must not hold the half-open slot
        let release_probe = || {
            if admission == Admission::Probe {
                breaker.release_probe();
            }
        };

        let cache_key = route
            .cache_ttl
            .map(|_| self.cache.key(service, &request.method, &request.path, &request.query));
        if let Some(key) = &cache_key {
            if let Some(data) = self.cache.get(key).await {
                self.metrics.record_cache_lookup(true);
                release_probe();
                return Ok(Served {
                    service: service.to_string(),
                    data,
                    cache_status: CacheStatus::Hit,
                });
            }
        }
        self.metrics.record_cache_lookup(false);

        self.ensure_capacity(service, self.limiter.admit(service), &request.id)
            .inspect_err(|_| release_probe())?;

        let service_request = ServiceRequest {
            request_id: request.id.clone(),
            service: service.to_string(),
            method: request.method.to_string(),
            path: matched.target_path(&request.path),
            path_params: matched.path_params.clone(),
            query_params: request.query.clone(),
            body: request.body.clone(),
            principal,
        };

        let dispatch_started = Instant::now();
        let result = self.dispatch(&route, &service_request).await;
        let latency = dispatch_started.elapsed();

        match &result {
            Ok(_) => {
                breaker.record_success();
                self.health.record_dispatch(service, latency, None);
            }
            Err(e) => {
                breaker.record_failure();
                // Missing registrations are reported by the health monitor, not as degradation
                if self.registry.is_registered(service) {
                    self.health.record_dispatch(service, latency, Some(&e.to_string()));
                }
                error!(
                    request_id = %request.id,
                    service = %service,
                    latency_ms = latency.as_millis() as u64,
                    error = %e,
                    "Dispatch failed"
                );
            }
        }
        let data = result?;

        let cache_status = match (&cache_key, route.cache_ttl) {
            (Some(key), Some(ttl)) => {
                self.cache.put(key, &data, ttl).await;
                CacheStatus::Miss
            }
            _ => CacheStatus::Bypass,
        };

        Ok(Served {
            service: service.to_string(),
            data,
            cache_status,
        })
    }

    fn ensure_capacity(&self, service: &str, decision: RateLimitDecision, request_id: &str) -> GatewayResult<()> {
        match decision.retry_after_secs() {
            None => Ok(()),
            Some(retry_after_secs) => {
                warn!(
                    request_id = %request_id,
                    service = %service,
                    retry_after_secs,
                    "Rate limit exceeded"
                );
                Err(GatewayError::RateLimited {
                    service: service.to_string(),
                    retry_after_secs,
                })
            }
        }
    }

    /// Invoke the backend, bounded by the route timeout, retrying retryable errors
    async fn dispatch(&self, route: &Route, request: &ServiceRequest) -> GatewayResult<Value> {
        let service = route.target_service.as_str();
        let mut attempt = 0u32;

        loop {
            let invocation = AssertUnwindSafe(self.registry.invoke(service, request)).catch_unwind();
            let result = match tokio::time::timeout(route.timeout, invocation).await {
                Ok(Ok(result)) => result.map_err(|e| as_dispatch_failure(service, e)),
                Ok(Err(_)) => Err(GatewayError::internal(format!("backend for {} panicked", service))),
                Err(_) => Err(GatewayError::Timeout {
                    service: service.to_string(),
                    timeout_ms: route.timeout.as_millis() as u64,
                }),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < route.retry_count => {
                    let backoff = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.min(6));
                    attempt += 1;
                    warn!(
                        request_id = %request.request_id,
                        service = %service,
                        attempt,
                        max_retries = route.retry_count,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying dispatch"
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    pub fn get_metrics(&self) -> GatewayMetrics {
        self.metrics.snapshot()
    }

    pub fn get_status(&self) -> GatewayStatus {
        let routes = self.routes.routes();
        GatewayStatus {
            gateway_info: GatewayInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: self.started_at,
                route_count: routes.len(),
                cache_backend: self.cache.backend().to_string(),
            },
            metrics: self.metrics.snapshot(),
            health: self.health.snapshot(),
            circuit_breakers: self.breakers.snapshot(),
            rate_limits: self.limiter.snapshot(),
            routes: routes.iter().map(|route| RouteSummary::from(route.as_ref())).collect(),
            services: self.registry.summaries(),
            cache: self.cache.stats(),
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            gateway: "healthy",
            services: self.health.snapshot(),
            timestamp: Utc::now(),
        }
    }

    /// Drop every cached response for a service
    pub async fn invalidate_cache(&self, service: &str) -> usize {
        let removed = self.cache.invalidate_service(service).await;
        info!(service = %service, removed, "Invalidated cached responses");
        removed
    }

    /// Check credentials for operator actions with the configured auth provider
    pub async fn authorize_operator(&self, request: &GatewayRequest) -> GatewayResult<Option<String>> {
        let outcome = self.auth.check_auth(request).await;
        if outcome.ok {
            return Ok(outcome.principal);
        }
        let reason = outcome.error.unwrap_or_else(|| "access denied".to_string());
        warn!(request_id = %request.id, path = %request.path, reason = %reason, "Operator action denied");
        Err(GatewayError::unauthenticated(reason))
    }

    /// Force a service's breaker closed; false if the service has no breaker
    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        self.breakers.reset(service)
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.registry.clone(),
            self.health.clone(),
            self.settings.health_check_interval,
            self.settings.probe_timeout,
        )
    }

    /// Start the health monitor, metrics roll-up and cleanup loops
    pub fn spawn_background(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(
            self.health_monitor(),
            self.metrics.clone(),
            self.limiter.clone(),
            self.cache.clone(),
            &self.settings,
        )
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::discovery::FnBackend;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    fn gateway() -> (Gateway, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let gateway = Gateway::builder().clock(clock.clone()).build();
        (gateway, clock)
    }

    fn echo() -> SharedBackend {
        Arc::new(FnBackend::new(|request: &ServiceRequest| {
            Ok(json!({ "path": request.path, "params": request.path_params }))
        }))
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (gateway, _clock) = gateway();
        let response = gateway.handle(GatewayRequest::new(Method::GET, "/missing")).await;

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let metrics = gateway.get_metrics();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.active_connections, 0);
    }

    #[tokio::test]
    async fn test_target_path_rewrite() {
        let (gateway, _clock) = gateway();
        gateway.register_service("users", echo());
        gateway
            .register_route(Route::new(Method::GET, "/api/users/{id}", "users").with_target_path("/v2/users/{id}"))
            .unwrap();

        let response = gateway.handle(GatewayRequest::new(Method::GET, "/api/users/7")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.data().unwrap()["path"], json!("/v2/users/7"));
        assert_eq!(response.cache_status, CacheStatus::Bypass);
    }

    #[tokio::test]
    async fn test_registration_initialises_service_state() {
        let (gateway, _clock) = gateway();
        gateway
            .register_route(Route::new(Method::GET, "/a", "alpha").with_rate_limit(3))
            .unwrap();

        let status = gateway.get_status();
        assert!(status.health.contains_key("alpha"));
        assert_eq!(status.circuit_breakers.len(), 1);
        assert_eq!(status.rate_limits.len(), 1);
        assert_eq!(status.rate_limits[0].limit, 3);
        assert_eq!(status.gateway_info.route_count, 1);
    }

    #[tokio::test]
    async fn test_reset_circuit_breaker() {
        let (gateway, _clock) = gateway();
        gateway.register_service(
            "flaky",
            Arc::new(FnBackend::new(|_: &ServiceRequest| Err(GatewayError::backend("flaky", "down")))),
        );
        gateway
            .register_route(Route::new(Method::GET, "/f", "flaky").with_circuit_breaker_threshold(1))
            .unwrap();

        gateway.handle(GatewayRequest::new(Method::GET, "/f")).await;
        let rejected = gateway.handle(GatewayRequest::new(Method::GET, "/f")).await;
        assert_eq!(rejected.status, StatusCode::SERVICE_UNAVAILABLE);

        assert!(gateway.reset_circuit_breaker("flaky"));
        assert!(!gateway.reset_circuit_breaker("unknown"));
        let retried = gateway.handle(GatewayRequest::new(Method::GET, "/f")).await;
        assert_eq!(retried.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_report() {
        let (gateway, _clock) = gateway();
        gateway.register_route(Route::new(Method::GET, "/a", "alpha")).unwrap();

        let report = gateway.health();
        assert_eq!(report.gateway, "healthy");
        assert!(report.services.contains_key("alpha"));
    }
}
