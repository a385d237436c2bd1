//! # Gateway Module
//!
//! - `handler`: the [`Gateway`] orchestrator and its builder
//! - `maintenance`: background health, metrics and cleanup loops
//! - `server`: axum front and operator endpoints

pub mod handler;
pub mod maintenance;
pub mod server;

pub use handler::{Gateway, GatewayBuilder, GatewayInfo, GatewayStatus, HealthReport, RouteSummary};
pub use maintenance::BackgroundTasks;
pub use server::{router, GatewayServer};
