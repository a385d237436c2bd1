//! # HTTP Server Module
//!
//! Axum front for the [`Gateway`]. Operator endpoints live under `/gateway/`;
//! every other request falls through to [`Gateway::handle`].
//!
//! | Method | Path                                          | Response                   |
//! |--------|-----------------------------------------------|----------------------------|
//! | GET    | `/gateway/status`                             | [`GatewayStatus`]          |
//! | GET    | `/gateway/metrics`                            | [`GatewayMetrics`]         |
//! | GET    | `/gateway/health`                             | [`HealthReport`]           |
//! | POST   | `/gateway/cache/:service/invalidate`          | `{service, removed}`       |
//! | POST   | `/gateway/circuit-breakers/:service/reset`    | `{service, reset}`         |
//!
//! The `POST` endpoints change gateway state and require credentials accepted by
//! the gateway's auth provider; unauthenticated calls get a 401 error envelope.
//!
//! [`GatewayStatus`]: super::GatewayStatus
//! [`GatewayMetrics`]: crate::observability::GatewayMetrics
//! [`HealthReport`]: super::HealthReport

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{GatewayRequest, GatewayResponse, REQUEST_ID_HEADER};

use super::Gateway;

#[derive(Clone)]
struct ServerState {
    gateway: Arc<Gateway>,
    max_body_size: usize,
}

/// Build the axum application for a gateway
pub fn router(gateway: Arc<Gateway>, max_body_size: usize) -> Router {
    let state = ServerState {
        gateway,
        max_body_size,
    };

    let operator_actions = Router::new()
        .route("/gateway/cache/:service/invalidate", post(invalidate_cache))
        .route("/gateway/circuit-breakers/:service/reset", post(reset_circuit_breaker))
        .route_layer(middleware::from_fn_with_state(state.clone(), operator_auth_middleware));

    Router::new()
        .route("/gateway/status", get(status))
        .route("/gateway/metrics", get(metrics))
        .route("/gateway/health", get(health))
        .merge(operator_actions)
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server bound to the configured address
pub struct GatewayServer {
    app: Router,
    bind_addr: SocketAddr,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>, config: &ServerConfig) -> GatewayResult<Self> {
        let bind_addr = format!("{}:{}", config.bind_address, config.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))?;

        Ok(Self {
            app: router(gateway, config.max_body_size),
            bind_addr,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn app(&self) -> Router {
        self.app.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight connections
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind gateway server to {}: {}", self.bind_addr, e))
        })?;

        info!(addr = %self.bind_addr, "Gateway HTTP server listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}

/// Reject operator actions the auth provider does not accept
async fn operator_auth_middleware(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    let credentials = GatewayRequest::from_uri(request.method().clone(), request.uri())
        .with_id(request_id_from(request.headers()))
        .with_headers(request.headers().clone());

    match state.gateway.authorize_operator(&credentials).await {
        Ok(principal) => {
            info!(
                request_id = %credentials.id,
                path = %credentials.path,
                principal = principal.as_deref().unwrap_or("-"),
                "Operator action"
            );
            next.run(request).await
        }
        Err(e) => GatewayResponse::error(&credentials.id, &e).into_response(),
    }
}

/// Reuse the caller's request ID when present
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

async fn status(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.gateway.get_status())
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.gateway.get_metrics())
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.gateway.health())
}

async fn invalidate_cache(State(state): State<ServerState>, Path(service): Path<String>) -> impl IntoResponse {
    let removed = state.gateway.invalidate_cache(&service).await;
    Json(json!({ "service": service, "removed": removed }))
}

async fn reset_circuit_breaker(State(state): State<ServerState>, Path(service): Path<String>) -> Response {
    if state.gateway.reset_circuit_breaker(&service) {
        Json(json!({ "service": service, "reset": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "service": service, "reset": false })),
        )
            .into_response()
    }
}

/// Convert the HTTP request and run it through the gateway
async fn handle_request(State(state): State<ServerState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let request_id = request_id_from(&parts.headers);

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return transport_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                &request_id,
                format!("Request body exceeds {} bytes", state.max_body_size),
            );
        }
    };

    let body = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                return transport_error(
                    StatusCode::BAD_REQUEST,
                    &request_id,
                    format!("Request body is not valid JSON: {}", e),
                );
            }
        }
    };

    let mut gateway_request = GatewayRequest::from_uri(parts.method, &parts.uri)
        .with_id(request_id)
        .with_headers(parts.headers);
    gateway_request.body = body;

    state.gateway.handle(gateway_request).await.into_response()
}

/// Error envelope for requests rejected before they reach the gateway
fn transport_error(status: StatusCode, request_id: &str, message: String) -> Response {
    let body = json!({
        "success": false,
        "error": true,
        "message": message,
        "requestId": request_id,
        "timestamp": Utc::now(),
    });

    let mut response = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
