//! # Request Gateway - Main Entry Point
//!
//! Start-up sequence:
//!
//! 1. Load `GATEWAY_CONFIG_PATH` (default `config/gateway.yaml`), apply environment
//!    overrides and validate; any error aborts start-up
//! 2. Initialise structured logging and, when `server.metrics_port` is set, the
//!    Prometheus exporter
//! 3. Build the gateway (HTTP backends, cache store, auth) and register routes
//! 4. Start background maintenance and serve until SIGINT/SIGTERM
//! 5. Drain in-flight requests, then stop the background loops

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use request_gateway::core::error::GatewayError;
use request_gateway::observability::{init_tracing, install_prometheus_exporter};
use request_gateway::{Gateway, GatewayConfig, GatewayResult, GatewayServer};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let config_path =
        std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "config/gateway.yaml".to_string());

    let config = match GatewayConfig::load_from_file(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging)?;
    info!("🚀 Starting request gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_path, "📋 Configuration loaded and validated");

    if let Some(port) = config.server.metrics_port {
        let addr: SocketAddr = format!("{}:{}", config.server.bind_address, port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid metrics address: {}", e)))?;
        install_prometheus_exporter(addr)?;
    }

    let gateway = Arc::new(Gateway::from_config(&config).await.map_err(|e| {
        error!(error = %e, "Failed to build gateway");
        e
    })?);

    let background = gateway.spawn_background();
    let server = GatewayServer::new(gateway.clone(), &config.server)?;
    info!(addr = %server.bind_addr(), "🌐 Gateway ready");

    let result = server.serve(shutdown_signal()).await;
    if let Err(e) = &result {
        error!(error = %e, "Server error");
    }

    info!("🧹 Stopping background maintenance...");
    background.shutdown().await;

    let metrics = gateway.get_metrics();
    info!(
        total_requests = metrics.total_requests,
        failed_requests = metrics.failed_requests,
        uptime_seconds = metrics.uptime_seconds,
        "✅ Request gateway shutdown complete"
    );
    result
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT, initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
