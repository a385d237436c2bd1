//! # Configuration Tests
//!
//! Loading gateway configuration from disk and building a gateway from it.

use axum::http::{Method, StatusCode};
use request_gateway::core::config::CacheBackendKind;
use request_gateway::{Gateway, GatewayConfig, GatewayRequest};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CONFIG: &str = r#"
server:
  port: 9000
  max_body_size: 4096

gateway:
  rate_limit_window: 30s
  circuit_breaker_cooldown: 10s

cache:
  backend: memory
  max_entries: 100

logging:
  level: debug
  format: pretty

auth:
  api_keys:
    key-1: alice

services:
  stocks:
    instances:
      - "http://127.0.0.1:1"

routes:
  - method: get
    path_pattern: /stock/{symbol}
    target_service: stocks
    rate_limit: 1
    cache_ttl: 5s
  - method: GET
    path_pattern: /private
    target_service: stocks
    auth_required: true
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_from_file() {
    let file = write_config(CONFIG);
    let config = GatewayConfig::load_from_file(file.path()).await.unwrap();

    assert_eq!(config.server.max_body_size, 4096);
    assert_eq!(config.gateway.rate_limit_window, Duration::from_secs(30));
    assert_eq!(config.gateway.circuit_breaker_cooldown, Duration::from_secs(10));
    assert_eq!(config.cache.backend, CacheBackendKind::Memory);
    assert_eq!(config.routes.len(), 2);
    assert_eq!(config.routes[0].method, Method::GET);
    assert_eq!(config.routes[0].cache_ttl, Some(Duration::from_secs(5)));
    assert_eq!(config.services["stocks"].health_path, "/health");
}

#[tokio::test]
async fn test_missing_file_is_an_error() {
    let result = GatewayConfig::load_from_file("/definitely/not/here.yaml").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_file_fails_validation() {
    let file = write_config(
        r#"
routes:
  - method: GET
    path_pattern: /orphan
    target_service: nobody
"#,
    );
    let error = GatewayConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(error.to_string().contains("nobody"));
}

#[tokio::test]
async fn test_gateway_from_config() {
    let config = GatewayConfig::from_yaml_str(CONFIG).unwrap();
    config.validate().unwrap();
    let gateway = Gateway::from_config(&config).await.unwrap();

    let status = gateway.get_status();
    assert_eq!(status.gateway_info.route_count, 2);
    assert_eq!(status.gateway_info.cache_backend, "memory");
    assert_eq!(status.services.len(), 1);
    assert_eq!(status.rate_limits[0].window_secs, 30);

    let unauthenticated = gateway.handle(GatewayRequest::new(Method::GET, "/private")).await;
    assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);

    // authenticated, but nothing listens on the configured instance
    let unreachable = gateway
        .handle(GatewayRequest::new(Method::GET, "/private").with_header("x-api-key", "key-1"))
        .await;
    assert_eq!(unreachable.status, StatusCode::INTERNAL_SERVER_ERROR);
}
