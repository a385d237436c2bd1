//! # Request Gateway Library
//!
//! The core of a request gateway: one entry point that routes inbound requests to
//! named backend services while enforcing authentication gating, per-service rate
//! limits, per-service circuit breaking and response caching, and tracking health
//! and performance metrics.
//!
//! ## Request lifecycle
//!
//! 1. Resolve the route (`404` on miss)
//! 2. Authenticate if the route requires it (`401`)
//! 3. Check the service's rate window (`429` with `retry-after`)
//! 4. Check the service's circuit breaker (`503`, fast-fail)
//! 5. Serve from the response cache when the route is cacheable
//! 6. Dispatch to the next service instance, bounded by the route timeout (`500` on failure)
//! 7. Record the outcome against the breaker, health and metrics; cache the payload
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::http::Method;
//! use request_gateway::discovery::FnBackend;
//! use request_gateway::{Gateway, GatewayRequest, Route};
//!
//! # async fn run() -> request_gateway::GatewayResult<()> {
//! let gateway = Gateway::builder().build();
//! gateway.register_service(
//!     "stocks",
//!     Arc::new(FnBackend::new(|request: &request_gateway::ServiceRequest| {
//!         Ok(serde_json::json!({ "symbol": request.path_params.get("symbol") }))
//!     })),
//! );
//! gateway.register_route(Route::new(Method::GET, "/stock/{symbol}", "stocks").with_rate_limit(100))?;
//!
//! let response = gateway.handle(GatewayRequest::new(Method::GET, "/stock/AAPL")).await;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

/// Error types, configuration, clock and request/response shapes
pub mod core;

/// The orchestrator, background maintenance and the HTTP front
pub mod gateway;

/// Authentication collaborators
pub mod auth;

/// Backend instances and the service registry
pub mod discovery;

/// Route definitions and the route table
pub mod routing;

/// Health tracking, metrics and logging
pub mod observability;

/// Response cache and its storage backends
pub mod caching;

/// Rate limiting and circuit breaking
pub mod traffic;

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{CacheStatus, GatewayRequest, GatewayResponse, ServiceRequest};
pub use gateway::{BackgroundTasks, Gateway, GatewayBuilder, GatewayServer};
pub use routing::{Route, RoutePriority, RouteTable, RouteType};
