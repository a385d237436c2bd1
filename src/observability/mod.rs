//! # Observability Module
//!
//! - `health`: per-service health records and the background probe loop
//! - `metrics`: request accounting, rolling rates and the Prometheus exporter
//! - `logging`: tracing subscriber initialisation

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthMonitor, HealthTracker, ProbeResult, ServiceHealth, ServiceStatus};
pub use logging::{init_tracing, LogConfig, LogFormat};
pub use metrics::{install_prometheus_exporter, ActiveRequest, GatewayMetrics, MetricsCollector, RequestGuard};
