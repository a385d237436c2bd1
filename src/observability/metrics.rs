//! # Metrics Collection
//!
//! In-process request accounting for the gateway, plus a mirror of every counter
//! through the `metrics` facade so a Prometheus exporter can scrape them.
//!
//! ## Accumulated values
//! - Monotonic counters: total, successful, failed, rate-limited, auth failures,
//!   circuit-open rejections, cache hits and misses
//! - `avgResponseTimeMs`: incremental running mean over successful + failed requests
//! - `cacheHitRate`: exponential moving average, `rate = rate * 0.9 + hit * 0.1`
//! - `requestsPerMinute`: recomputed by [`MetricsCollector::rollup`] from the start
//!   times of requests seen in the last 60 seconds
//!
//! Every request holds a [`RequestGuard`] from [`MetricsCollector::begin_request`];
//! dropping it decrements `activeConnections` and removes the in-flight entry, so the
//! bookkeeping survives every early return.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

use crate::core::clock::SharedClock;
use crate::core::error::{GatewayError, GatewayResult};

const CACHE_HIT_SMOOTHING: f64 = 0.1;
const RPM_WINDOW: Duration = Duration::from_secs(60);

/// Point-in-time copy of the gateway metrics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub auth_failures: u64,
    pub circuit_open_rejections: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_response_time_ms: f64,
    pub requests_per_minute: u64,
    pub cache_hit_rate: f64,
    pub active_connections: i64,
    pub uptime_seconds: u64,
}

/// A request currently inside the gateway
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub method: String,
    pub path: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RollingStats {
    avg_response_time_ms: f64,
    samples: u64,
    cache_hit_rate: f64,
    requests_per_minute: u64,
}

/// Request metrics for one gateway instance
#[derive(Debug)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    auth_failures: AtomicU64,
    circuit_open_rejections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    active_connections: AtomicI64,
    rolling: Mutex<RollingStats>,
    recent_starts: Mutex<VecDeque<Instant>>,
    active: DashMap<String, ActiveRequest>,
    clock: SharedClock,
    started_at: Instant,
}

/// Decrements `activeConnections` and drops the in-flight entry when dropped
#[must_use = "dropping the guard ends the request immediately"]
pub struct RequestGuard<'a> {
    collector: &'a MetricsCollector,
    request_id: String,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let active = self.collector.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        self.collector.active.remove(&self.request_id);
        gauge!("gateway_active_connections").set(active as f64);
    }
}

impl MetricsCollector {
    pub fn new(clock: SharedClock) -> Self {
        let started_at = clock.now();
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rate_limited_requests: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            circuit_open_rejections: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            rolling: Mutex::new(RollingStats::default()),
            recent_starts: Mutex::new(VecDeque::new()),
            active: DashMap::new(),
            clock,
            started_at,
        }
    }

    /// Count a new request and track it until the guard is dropped
    pub fn begin_request(&self, request_id: &str, method: &str, path: &str) -> RequestGuard<'_> {
        let now = self.clock.now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let active = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut starts = self.recent_starts.lock();
            starts.push_back(now);
            prune_starts(&mut starts, now);
        }
        self.active.insert(
            request_id.to_string(),
            ActiveRequest {
                method: method.to_string(),
                path: path.to_string(),
                started_at: Utc::now(),
            },
        );

        counter!("gateway_requests_total").increment(1);
        gauge!("gateway_active_connections").set(active as f64);

        RequestGuard {
            collector: self,
            request_id: request_id.to_string(),
        }
    }

    /// A request that completed with a service payload (dispatched or cached)
    pub fn record_success(&self, latency: Duration) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        counter!("gateway_requests_completed_total", "outcome" => "success").increment(1);
    }

    /// A request that failed: no route, backend error, timeout, internal error
    pub fn record_failure(&self, latency: Duration) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
        counter!("gateway_requests_completed_total", "outcome" => "failure").increment(1);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_requests.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_requests_completed_total", "outcome" => "rate_limited").increment(1);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_requests_completed_total", "outcome" => "unauthenticated").increment(1);
    }

    /// A fast-fail on an open circuit; not a dispatch failure
    pub fn record_circuit_open(&self) {
        self.circuit_open_rejections.fetch_add(1, Ordering::Relaxed);
        counter!("gateway_requests_completed_total", "outcome" => "circuit_open").increment(1);
    }

    /// Update the cache hit counters and moving average
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            counter!("gateway_cache_hits_total").increment(1);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            counter!("gateway_cache_misses_total").increment(1);
        }

        let mut rolling = self.rolling.lock();
        let observation = if hit { 1.0 } else { 0.0 };
        rolling.cache_hit_rate =
            rolling.cache_hit_rate * (1.0 - CACHE_HIT_SMOOTHING) + observation * CACHE_HIT_SMOOTHING;
    }

    fn record_latency(&self, latency: Duration) {
        let millis = latency.as_secs_f64() * 1000.0;
        {
            let mut rolling = self.rolling.lock();
            rolling.samples += 1;
            rolling.avg_response_time_ms += (millis - rolling.avg_response_time_ms) / rolling.samples as f64;
        }
        histogram!("gateway_request_duration_seconds").record(latency.as_secs_f64());
    }

    /// Recompute requests-per-minute from recent request starts
    pub fn rollup(&self) -> u64 {
        let now = self.clock.now();
        let rpm = {
            let mut starts = self.recent_starts.lock();
            prune_starts(&mut starts, now);
            starts.len() as u64
        };

        self.rolling.lock().requests_per_minute = rpm;
        gauge!("gateway_requests_per_minute").set(rpm as f64);
        rpm
    }

    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn snapshot(&self) -> GatewayMetrics {
        let rolling = self.rolling.lock();
        GatewayMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            circuit_open_rejections: self.circuit_open_rejections.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            avg_response_time_ms: rolling.avg_response_time_ms,
            requests_per_minute: rolling.requests_per_minute,
            cache_hit_rate: rolling.cache_hit_rate,
            active_connections: self.active_connections.load(Ordering::Relaxed),
            uptime_seconds: self.clock.now().saturating_duration_since(self.started_at).as_secs(),
        }
    }
}

fn prune_starts(starts: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = starts.front() {
        if now.saturating_duration_since(*oldest) > RPM_WINDOW {
            starts.pop_front();
        } else {
            break;
        }
    }
}

/// Install the Prometheus recorder with its own HTTP listener
pub fn install_prometheus_exporter(addr: SocketAddr) -> GatewayResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GatewayError::internal(format!("Failed to install Prometheus exporter: {}", e)))?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
