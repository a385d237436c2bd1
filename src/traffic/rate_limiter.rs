//! # Sliding-Window Rate Limiter
//!
//! Per-service admission control. Each limited service owns a window of admit
//! timestamps; a request is admitted only if fewer than `limit` admissions happened
//! within the trailing window.
//!
//! Two entry points share the same eviction step:
//! - [`RateLimiter::check`] tests whether a slot is free without taking it
//! - [`RateLimiter::admit`] takes the slot
//!
//! The gateway checks early in the request lifecycle and admits just before dispatch,
//! so a response served from the cache never consumes a slot.
//!
//! Services that were never configured are not limited.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap::get_mut` holds the shard lock for the whole evict-test-append
//!   sequence, so updates for one service are linearizable without a global lock
//! - `VecDeque<Instant>` keeps timestamps ordered, so eviction only pops the front

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::clock::SharedClock;

/// Outcome of a rate-limit check or admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The service has no configured limit
    Unlimited,
    /// A slot is (or was) available; `remaining` counts free slots afterwards
    Allowed { remaining: u32 },
    /// The window is full until the oldest admission expires
    Rejected { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Whole seconds until a slot frees up, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Rejected { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
struct RateWindow {
    limit: u32,
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    fn evict(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.admitted.len();
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
        before - self.admitted.len()
    }

    fn decide(&self, now: Instant, window: Duration) -> RateLimitDecision {
        let used = self.admitted.len() as u32;
        if used < self.limit {
            return RateLimitDecision::Allowed {
                remaining: self.limit - used,
            };
        }

        let retry_after = self
            .admitted
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(window);
        RateLimitDecision::Rejected { retry_after }
    }
}

/// Point-in-time view of one service's window
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    pub service: String,
    pub limit: u32,
    pub used: u32,
    pub window_secs: u64,
}

/// Per-service sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    window: Duration,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(window: Duration, clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            clock,
        }
    }

    /// Length of the trailing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Give a service a limit. The first configured limit for a service is kept.
    pub fn configure(&self, service: &str, limit: u32) {
        self.windows
            .entry(service.to_string())
            .or_insert_with(|| RateWindow {
                limit,
                admitted: VecDeque::new(),
            });
    }

    pub fn is_limited(&self, service: &str) -> bool {
        self.windows.contains_key(service)
    }

    /// Test for a free slot without consuming it
    pub fn check(&self, service: &str) -> RateLimitDecision {
        let Some(mut window) = self.windows.get_mut(service) else {
            return RateLimitDecision::Unlimited;
        };
        let now = self.clock.now();
        window.evict(now, self.window);
        window.decide(now, self.window)
    }

    /// Consume a slot if one is free
    pub fn admit(&self, service: &str) -> RateLimitDecision {
        let Some(mut window) = self.windows.get_mut(service) else {
            return RateLimitDecision::Unlimited;
        };
        let now = self.clock.now();
        window.evict(now, self.window);

        match window.decide(now, self.window) {
            RateLimitDecision::Allowed { remaining } => {
                window.admitted.push_back(now);
                RateLimitDecision::Allowed {
                    remaining: remaining - 1,
                }
            }
            rejected => {
                debug!(service = %service, limit = window.limit, "Rate limit window full");
                rejected
            }
        }
    }

    /// Drop expired timestamps for every service, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        self.windows
            .iter_mut()
            .map(|mut window| window.evict(now, self.window))
            .sum()
    }

    /// Current window usage for every limited service
    pub fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        self.windows
            .iter()
            .map(|entry| RateLimitSnapshot {
                service: entry.key().clone(),
                limit: entry.limit,
                used: entry.admitted.len() as u32,
                window_secs: self.window.as_secs(),
            })
            .collect()
    }
}
