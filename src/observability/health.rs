//! # Health Monitoring
//!
//! Per-service health records and the background probe loop.
//!
//! [`HealthTracker`] holds one [`ServiceHealth`] per known service. Records are
//! created lazily when the first route for a service is registered and are never
//! removed. Two writers update them:
//!
//! - the gateway, after every dispatch (success → healthy, failure → degraded)
//! - the [`HealthMonitor`], every `health_check_interval`
//!
//! A probe round checks every instance of every known service. All instances
//! answering means healthy, some means degraded, none (or no instances at all)
//! means unhealthy. A failing, panicking or hanging probe never stops the loop: it
//! is bounded by `probe_timeout`, logged, and recorded as the service's `last_error`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::ServiceRegistry;

/// Health status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health record for one service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: ServiceStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
    pub error_count: u64,
    pub success_count: u64,
    pub last_error: Option<String>,
}

impl ServiceHealth {
    fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: ServiceStatus::Unknown,
            last_check: None,
            last_response_time_ms: None,
            error_count: 0,
            success_count: 0,
            last_error: None,
        }
    }
}

/// Outcome of probing one service
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: ServiceStatus,
    pub response_time: Duration,
    pub error: Option<String>,
}

/// Concurrent store of per-service health records
#[derive(Debug, Default)]
pub struct HealthTracker {
    services: DashMap<String, ServiceHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record for a service if it does not exist yet
    pub fn ensure(&self, service: &str) {
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(service));
    }

    /// Update after a dispatch through the gateway
    pub fn record_dispatch(&self, service: &str, latency: Duration, error: Option<&str>) {
        let mut health = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(service));

        health.last_response_time_ms = Some(latency.as_millis() as u64);
        match error {
            None => {
                health.status = ServiceStatus::Healthy;
                health.success_count += 1;
            }
            Some(message) => {
                health.status = ServiceStatus::Degraded;
                health.error_count += 1;
                health.last_error = Some(message.to_string());
            }
        }
    }

    /// Update after a health probe
    pub fn record_probe(&self, service: &str, result: ProbeResult) {
        let mut health = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(service));

        health.status = result.status;
        health.last_check = Some(Utc::now());
        health.last_response_time_ms = Some(result.response_time.as_millis() as u64);
        if result.status == ServiceStatus::Healthy {
            health.success_count += 1;
        } else {
            health.error_count += 1;
        }
        if result.error.is_some() {
            health.last_error = result.error;
        }
    }

    pub fn get(&self, service: &str) -> Option<ServiceHealth> {
        self.services.get(service).map(|entry| entry.clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All records, sorted by service name
    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Background prober for every known service
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    tracker: Arc<HealthTracker>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        tracker: Arc<HealthTracker>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            interval,
            probe_timeout,
        }
    }

    /// Probe every known service once, returning how many were probed
    pub async fn run_once(&self) -> usize {
        let mut services = self.tracker.service_names();
        for name in self.registry.registered_names() {
            if !services.contains(&name) {
                services.push(name);
            }
        }

        let probes = services.iter().map(|service| async move {
            let result = self.probe(service).await;
            (service, result)
        });

        let results = join_all(probes).await;
        let count = results.len();
        for (service, result) in results {
            if let Some(error) = &result.error {
                warn!(service = %service, status = ?result.status, error = %error, "Health probe failed");
            } else {
                debug!(service = %service, "Health probe succeeded");
            }
            self.tracker.record_probe(service, result);
        }
        count
    }

    async fn probe(&self, service: &str) -> ProbeResult {
        let instances = self.registry.instances(service);
        let started = Instant::now();

        if instances.is_empty() {
            return ProbeResult {
                status: ServiceStatus::Unhealthy,
                response_time: Duration::ZERO,
                error: Some("no instances registered".to_string()),
            };
        }

        let checks = instances.iter().map(|instance| async move {
            let check = AssertUnwindSafe(instance.health_check()).catch_unwind();
            match tokio::time::timeout(self.probe_timeout, check).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(format!("{}: {}", instance.describe(), e)),
                Ok(Err(_)) => Err(format!("{}: probe panicked", instance.describe())),
                Err(_) => Err(format!(
                    "{}: probe timed out after {}ms",
                    instance.describe(),
                    self.probe_timeout.as_millis()
                )),
            }
        });
        let outcomes = join_all(checks).await;

        let total = outcomes.len();
        let errors: Vec<String> = outcomes.into_iter().filter_map(Result::err).collect();
        let status = match errors.len() {
            0 => ServiceStatus::Healthy,
            n if n == total => ServiceStatus::Unhealthy,
            _ => ServiceStatus::Degraded,
        };

        ProbeResult {
            status,
            response_time: started.elapsed(),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    /// Probe on every interval tick until cancelled. A round already in progress
    /// finishes before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Health monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Health monitor stopped");
    }
}
