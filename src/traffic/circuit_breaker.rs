//! Circuit Breaker Implementation
//!
//! One breaker per backend service prevents cascade failures when a service starts
//! failing. The state machine has three states:
//!
//! - **Closed**: normal operation. `threshold` consecutive failures open the circuit.
//! - **Open**: requests fail fast without dispatch. Once more than `cooldown` has
//!   passed since the last failure, the next admission check moves the breaker to
//!   half-open and lets that one request through as a probe.
//! - **HalfOpen**: the probe's outcome decides. Success closes the circuit and resets
//!   the failure count; failure reopens it. While the probe is outstanding every
//!   other request is rejected. A probe answered without dispatch (cache hit, rate
//!   limit) is handed back with [`CircuitBreaker::release_probe`]; one that never
//!   reports at all is superseded after another `cooldown`.
//!
//! [`CircuitBreaker::is_open`] is deliberately a mutating read: checking the breaker
//! at the cooldown boundary performs the open → half-open transition.
//!
//! ## Key Rust Concepts:
//! - `parking_lot::Mutex` guards each breaker, so check-then-transition is atomic per
//!   service while different services never contend
//! - `DashMap` in [`CircuitBreakerRegistry`] gives lazy per-service creation
//! - Transitions are mirrored to the `metrics` facade

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::clock::SharedClock;

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Requests fail fast
    Open,
    /// A single probe request is testing recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Result of asking the breaker to let a request through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed
    Allowed,
    /// Circuit half-open and this request is the single probe
    Probe,
    /// Fail fast
    Rejected,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    /// When the current half-open probe was let through
    probe_started: Option<Instant>,
}

/// Serializable view of one breaker
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub threshold: u32,
    pub cooldown_seconds: u64,
}

/// Per-service circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
    clock: SharedClock,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(service: impl Into<String>, threshold: u32, cooldown: Duration, clock: SharedClock) -> Self {
        Self {
            service: service.into(),
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                last_failure_at: None,
                probe_started: None,
            }),
            clock,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether a request must be rejected without dispatch
    pub fn is_open(&self) -> bool {
        self.admission() == Admission::Rejected
    }

    /// Decide whether a request may dispatch, and whether it is the half-open probe
    pub fn admission(&self) -> Admission {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) > self.cooldown);
                if !cooled_down {
                    return Admission::Rejected;
                }

                inner.state = CircuitState::HalfOpen;
                inner.probe_started = Some(now);
                info!(service = %self.service, "Circuit breaker half-open, allowing probe");
                counter!("gateway_circuit_breaker_transitions_total",
                    "service" => self.service.clone(), "state" => "half_open")
                .increment(1);
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                let probe_pending = inner
                    .probe_started
                    .is_some_and(|at| now.saturating_duration_since(at) <= self.cooldown);
                if probe_pending {
                    return Admission::Rejected;
                }
                inner.probe_started = Some(now);
                Admission::Probe
            }
        }
    }

    /// Hand back a probe that will never report an outcome, so the next request
    /// can probe instead
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_started = None;
            debug!(service = %self.service, "Half-open probe released without dispatch");
        }
    }

    /// Record the outcome of a dispatch
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.probe_started = None;
                info!(service = %self.service, "Circuit breaker closed after successful probe");
                counter!("gateway_circuit_breaker_transitions_total",
                    "service" => self.service.clone(), "state" => "closed")
                .increment(1);
            }
            // A request admitted before the circuit opened; stay open
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);
        inner.last_failure_at = Some(Utc::now());

        let opens = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if opens {
            inner.state = CircuitState::Open;
            inner.probe_started = None;
            warn!(
                service = %self.service,
                failure_count = inner.failure_count,
                threshold = self.threshold,
                "Circuit breaker opened"
            );
            counter!("gateway_circuit_breaker_transitions_total",
                "service" => self.service.clone(), "state" => "open")
            .increment(1);
        }
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_started = None;
        info!(service = %self.service, "Circuit breaker reset");
    }

    /// Current state without the half-open side effect
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            service_name: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_at,
            threshold: self.threshold,
            cooldown_seconds: self.cooldown.as_secs(),
        }
    }
}

/// Lazily created breakers keyed by service name
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    cooldown: Duration,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(cooldown: Duration, clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            cooldown,
            clock,
        }
    }

    /// Get the service's breaker, creating it with `threshold` if absent.
    /// The first threshold registered for a service is kept.
    pub fn get_or_create(&self, service: &str, threshold: u32) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    threshold,
                    self.cooldown,
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|entry| Arc::clone(entry.value()))
    }

    /// Force a service's breaker closed; false if the service has none
    pub fn reset(&self, service: &str) -> bool {
        match self.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.iter().map(|entry| entry.snapshot()).collect()
    }
}
