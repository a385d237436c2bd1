//! # Gateway Lifecycle Tests
//!
//! Drives the `Gateway` through complete request lifecycles with in-process
//! backends and a manual clock:
//! - cached reads, rate-limit windows and retry-after
//! - circuit breaker open / half-open / closed transitions under real dispatch
//! - auth gating, timeouts, retries and round-robin dispatch
//! - metrics accounting under concurrency

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use futures::future::join_all;
use request_gateway::auth::ApiKeyAuthProvider;
use request_gateway::core::clock::ManualClock;
use request_gateway::discovery::{FnBackend, ServiceBackend, SharedBackend};
use request_gateway::observability::ServiceStatus;
use request_gateway::traffic::CircuitState;
use request_gateway::{
    CacheStatus, Gateway, GatewayError, GatewayRequest, GatewayResult, Route, ServiceRequest,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that counts invocations and can be switched into failure mode
struct ControlledBackend {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl ControlledBackend {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceBackend for ControlledBackend {
    async fn invoke(&self, request: &ServiceRequest) -> GatewayResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::backend(&request.service, "upstream exploded"));
        }
        Ok(json!({
            "path": request.path,
            "params": request.path_params,
            "principal": request.principal,
        }))
    }
}

fn gateway_with_clock() -> (Gateway, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let gateway = Gateway::builder().clock(clock.clone()).build();
    (gateway, clock)
}

fn get(path: &str) -> GatewayRequest {
    GatewayRequest::new(Method::GET, path)
}

#[tokio::test]
async fn test_cached_reads_and_rate_limit_window() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("stockService", backend.clone());
    gateway
        .register_route(
            Route::new(Method::GET, "/stock/{symbol}", "stockService")
                .with_rate_limit(2)
                .with_cache_ttl(Duration::from_secs(5)),
        )
        .unwrap();

    let first = gateway.handle(get("/stock/AAPL")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(first.data().unwrap()["params"]["symbol"], json!("AAPL"));
    assert_eq!(backend.calls(), 1);

    let second = gateway.handle(get("/stock/AAPL")).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.body["cached"], json!(true));
    assert_eq!(second.data(), first.data());
    assert_eq!(backend.calls(), 1);

    let third = gateway.handle(get("/stock/MSFT")).await;
    assert_eq!(third.status, StatusCode::OK);
    assert_eq!(backend.calls(), 2);

    let fourth = gateway.handle(get("/stock/GOOG")).await;
    assert_eq!(fourth.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(fourth.retry_after_secs, Some(60));
    assert_eq!(fourth.body["details"]["retryAfter"], json!(60));
    assert_eq!(backend.calls(), 2);

    // a full window rejects even requests that would be served from cache
    let cached_but_limited = gateway.handle(get("/stock/AAPL")).await;
    assert_eq!(cached_but_limited.status, StatusCode::TOO_MANY_REQUESTS);

    clock.advance(Duration::from_secs(61));
    let after_window = gateway.handle(get("/stock/GOOG")).await;
    assert_eq!(after_window.status, StatusCode::OK);
    assert_eq!(backend.calls(), 3);

    let metrics = gateway.get_metrics();
    assert_eq!(metrics.total_requests, 6);
    assert_eq!(metrics.successful_requests, 4);
    assert_eq!(metrics.rate_limited_requests, 2);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test]
async fn test_cache_expires_after_ttl() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("quotes", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/quote/{symbol}", "quotes").with_cache_ttl(Duration::from_secs(1)))
        .unwrap();

    gateway.handle(get("/quote/AAPL")).await;
    assert_eq!(gateway.handle(get("/quote/AAPL")).await.cache_status, CacheStatus::Hit);

    clock.advance(Duration::from_secs(2));
    let expired = gateway.handle(get("/quote/AAPL")).await;
    assert_eq!(expired.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 2);

    // query parameters are part of the fingerprint
    let other_query = gateway.handle(get("/quote/AAPL").with_query("range", "1d")).await;
    assert_eq!(other_query.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_invalidate_cache_forces_dispatch() {
    let (gateway, _clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("quotes", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/quote/{symbol}", "quotes").with_cache_ttl(Duration::from_secs(30)))
        .unwrap();

    gateway.handle(get("/quote/AAPL")).await;
    gateway.handle(get("/quote/MSFT")).await;
    assert_eq!(gateway.invalidate_cache("quotes").await, 2);

    let refreshed = gateway.handle(get("/quote/AAPL")).await;
    assert_eq!(refreshed.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_failure_cascade_and_half_open_recovery() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("X", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/x/{id}", "X").with_circuit_breaker_threshold(2))
        .unwrap();

    backend.set_failing(true);
    for _ in 0..2 {
        let response = gateway.handle(get("/x/1")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["details"]["type"], json!("backend_error"));
    }

    let fast_fail = gateway.handle(get("/x/1")).await;
    assert_eq!(fast_fail.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fast_fail.body["details"]["circuitBreaker"], json!("open"));
    assert_eq!(backend.calls(), 2);

    clock.advance(Duration::from_secs(61));
    backend.set_failing(false);
    let probe = gateway.handle(get("/x/1")).await;
    assert_eq!(probe.status, StatusCode::OK);
    assert_eq!(backend.calls(), 3);

    let status = gateway.get_status();
    let breaker = &status.circuit_breakers[0];
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);

    let metrics = gateway.get_metrics();
    assert_eq!(metrics.failed_requests, 2);
    assert_eq!(metrics.circuit_open_rejections, 1);
}

#[tokio::test]
async fn test_failed_probe_reopens_circuit() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("X", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/x", "X").with_circuit_breaker_threshold(2))
        .unwrap();

    backend.set_failing(true);
    gateway.handle(get("/x")).await;
    gateway.handle(get("/x")).await;

    clock.advance(Duration::from_secs(61));
    let probe = gateway.handle(get("/x")).await;
    assert_eq!(probe.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(backend.calls(), 3);

    let rejected = gateway.handle(get("/x")).await;
    assert_eq!(rejected.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.calls(), 3);
    assert_eq!(gateway.get_status().circuit_breakers[0].state, CircuitState::Open);
}

#[tokio::test]
async fn test_half_open_admits_single_probe() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::with_delay(Duration::from_millis(100));
    gateway.register_service("X", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/x", "X").with_circuit_breaker_threshold(1))
        .unwrap();

    backend.set_failing(true);
    gateway.handle(get("/x")).await;
    backend.set_failing(false);
    clock.advance(Duration::from_secs(61));

    let (probe, concurrent) = tokio::join!(gateway.handle(get("/x")), gateway.handle(get("/x")));
    assert_eq!(probe.status, StatusCode::OK);
    assert_eq!(concurrent.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_any_backend_error_feeds_breaker() {
    let (gateway, _clock) = gateway_with_clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    gateway.register_service(
        "parser",
        Arc::new(FnBackend::new(move |_request: &ServiceRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            // a backend bubbling up a serialization failure
            Ok(serde_json::from_str::<Value>("{not json")?)
        })),
    );
    gateway
        .register_route(Route::new(Method::GET, "/parse", "parser").with_circuit_breaker_threshold(2))
        .unwrap();

    for _ in 0..2 {
        let response = gateway.handle(get("/parse")).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["details"]["type"], json!("backend_error"));
    }

    let rejected = gateway.handle(get("/parse")).await;
    assert_eq!(rejected.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.get_status().circuit_breakers[0].state, CircuitState::Open);
}

#[tokio::test]
async fn test_half_open_slot_survives_cache_hit() {
    let (gateway, clock) = gateway_with_clock();
    let backend = ControlledBackend::new();
    gateway.register_service("X", backend.clone());
    gateway
        .register_route(
            Route::new(Method::GET, "/a", "X")
                .with_circuit_breaker_threshold(1)
                .with_cache_ttl(Duration::from_secs(300)),
        )
        .unwrap();
    gateway.register_route(Route::new(Method::GET, "/b", "X")).unwrap();

    assert_eq!(gateway.handle(get("/a")).await.cache_status, CacheStatus::Miss);
    backend.set_failing(true);
    assert_eq!(gateway.handle(get("/b")).await.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(gateway.handle(get("/b")).await.status, StatusCode::SERVICE_UNAVAILABLE);

    clock.advance(Duration::from_secs(61));
    backend.set_failing(false);

    // first request after cooldown is answered from cache and never dispatches
    let cached = gateway.handle(get("/a")).await;
    assert_eq!(cached.status, StatusCode::OK);
    assert_eq!(cached.cache_status, CacheStatus::Hit);
    assert_eq!(backend.calls(), 2);

    // so the next request still gets to probe, and its success closes the circuit
    let recovered = gateway.handle(get("/b")).await;
    assert_eq!(recovered.status, StatusCode::OK);
    assert_eq!(backend.calls(), 3);
    assert_eq!(gateway.get_status().circuit_breakers[0].state, CircuitState::Closed);
}

#[tokio::test]
async fn test_client_errors_do_not_trip_breaker() {
    let clock = Arc::new(ManualClock::new());
    let gateway = Gateway::builder()
        .clock(clock)
        .auth_provider(Arc::new(ApiKeyAuthProvider::default().with_key("k", "alice")))
        .build();
    gateway.register_service("X", ControlledBackend::new());
    gateway
        .register_route(Route::new(Method::GET, "/x", "X").with_auth().with_circuit_breaker_threshold(1))
        .unwrap();

    for _ in 0..3 {
        assert_eq!(gateway.handle(get("/x")).await.status, StatusCode::UNAUTHORIZED);
        assert_eq!(gateway.handle(get("/nope")).await.status, StatusCode::NOT_FOUND);
    }

    let status = gateway.get_status();
    assert_eq!(status.circuit_breakers[0].state, CircuitState::Closed);
    assert_eq!(status.circuit_breakers[0].failure_count, 0);
    assert_eq!(status.metrics.auth_failures, 3);
    assert_eq!(status.metrics.failed_requests, 3);
}

#[tokio::test]
async fn test_authenticated_principal_reaches_backend() {
    let gateway = Gateway::builder()
        .auth_provider(Arc::new(ApiKeyAuthProvider::default().with_key("secret", "alice")))
        .build();
    gateway.register_service("watchlist", ControlledBackend::new());
    gateway
        .register_route(Route::new(Method::GET, "/watchlist", "watchlist").with_auth())
        .unwrap();

    let denied = gateway.handle(get("/watchlist")).await;
    assert_eq!(denied.status, StatusCode::UNAUTHORIZED);
    assert_eq!(denied.body["success"], json!(false));
    assert!(denied.body["message"].as_str().unwrap().contains("missing credentials"));

    let allowed = gateway
        .handle(get("/watchlist").with_header("authorization", "Bearer secret"))
        .await;
    assert_eq!(allowed.status, StatusCode::OK);
    assert_eq!(allowed.data().unwrap()["principal"], json!("alice"));
}

#[tokio::test]
async fn test_dispatch_timeout_counts_as_failure() {
    let (gateway, _clock) = gateway_with_clock();
    let backend = ControlledBackend::with_delay(Duration::from_millis(500));
    gateway.register_service("slow", backend.clone());
    gateway
        .register_route(
            Route::new(Method::GET, "/slow", "slow")
                .with_timeout(Duration::from_millis(50))
                .with_circuit_breaker_threshold(1),
        )
        .unwrap();

    let response = gateway.handle(get("/slow")).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["details"]["type"], json!("backend_timeout"));
    assert_eq!(response.body["details"]["timeoutMs"], json!(50));

    let status = gateway.get_status();
    assert_eq!(status.circuit_breakers[0].state, CircuitState::Open);
    assert!(status.health["slow"].last_error.is_some());
}

#[tokio::test]
async fn test_retries_recover_transient_failures() {
    let (gateway, _clock) = gateway_with_clock();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    gateway.register_service(
        "flaky",
        Arc::new(FnBackend::new(move |_: &ServiceRequest| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GatewayError::backend("flaky", "connection reset"))
            } else {
                Ok(json!({ "ok": true }))
            }
        })),
    );
    gateway
        .register_route(Route::new(Method::GET, "/flaky", "flaky").with_retries(2))
        .unwrap();

    let response = gateway.handle(get("/flaky")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(gateway.get_status().circuit_breakers[0].failure_count, 0);
}

#[tokio::test]
async fn test_round_robin_across_instances() {
    let (gateway, _clock) = gateway_with_clock();
    let instances: Vec<SharedBackend> = ["a", "b"]
        .into_iter()
        .map(|name| {
            Arc::new(FnBackend::new(move |_: &ServiceRequest| Ok(json!(name)))) as SharedBackend
        })
        .collect();
    gateway.register_instances("pool", instances);
    gateway.register_route(Route::new(Method::GET, "/pool", "pool")).unwrap();

    let mut served = Vec::new();
    for _ in 0..4 {
        let response = gateway.handle(get("/pool")).await;
        served.push(response.data().unwrap().as_str().unwrap().to_string());
    }
    assert_eq!(served, vec!["a", "b", "a", "b"]);
}

#[tokio::test]
async fn test_concurrent_requests_respect_limit() {
    let clock = Arc::new(ManualClock::new());
    let gateway = Arc::new(Gateway::builder().clock(clock).build());
    let backend = ControlledBackend::with_delay(Duration::from_millis(5));
    gateway.register_service("busy", backend.clone());
    gateway
        .register_route(Route::new(Method::GET, "/busy/{n}", "busy").with_rate_limit(10))
        .unwrap();

    let requests = (0..50).map(|n| {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.handle(get(&format!("/busy/{}", n))).await })
    });
    let responses: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    let ok = responses.iter().filter(|r| r.status == StatusCode::OK).count();
    let limited = responses
        .iter()
        .filter(|r| r.status == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!(ok, 10);
    assert_eq!(limited, 40);
    assert_eq!(backend.calls(), 10);

    let metrics = gateway.get_metrics();
    assert_eq!(metrics.total_requests, 50);
    assert_eq!(metrics.successful_requests, 10);
    assert_eq!(metrics.rate_limited_requests, 40);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test]
async fn test_unregistered_service_is_backend_error() {
    let (gateway, _clock) = gateway_with_clock();
    gateway.register_route(Route::new(Method::GET, "/ghost", "ghost")).unwrap();

    let response = gateway.handle(get("/ghost")).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["details"]["service"], json!("ghost"));
    assert_eq!(gateway.get_metrics().failed_requests, 1);

    let status = gateway.get_status();
    assert_eq!(status.circuit_breakers[0].failure_count, 1);
    let health = &status.health["ghost"];
    assert_eq!(health.status, ServiceStatus::Unknown);
    assert!(health.last_error.is_none());
}
