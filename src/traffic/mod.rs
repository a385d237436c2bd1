//! # Traffic Management Module
//!
//! Per-service admission policies applied before dispatch:
//!
//! - `RateLimiter`: sliding-window admission per service
//! - `CircuitBreaker`: fail-fast state machine per service, created lazily through
//!   `CircuitBreakerRegistry`

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot, CircuitState};
pub use rate_limiter::{RateLimitDecision, RateLimitSnapshot, RateLimiter};
