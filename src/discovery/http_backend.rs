//! HTTP implementation of [`ServiceBackend`] using `reqwest`.
//!
//! The routed target path is appended to the instance base URL, query parameters
//! are re-encoded, and the request ID travels downstream in `x-request-id`. A 2xx
//! JSON body becomes the service payload; non-JSON bodies are passed through as a
//! string. Timeouts are enforced by the gateway, not here.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::backend::ServiceBackend;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ServiceRequest;

/// Header carrying the authenticated principal to the backend
pub const PRINCIPAL_HEADER: &str = "x-gateway-principal";

/// A backend instance reachable over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    service: String,
    base_url: Url,
    health_path: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        service: impl Into<String>,
        base_url: &str,
        health_path: impl Into<String>,
        client: reqwest::Client,
    ) -> GatewayResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::config(format!("Invalid instance URL '{}': {}", base_url, e)))?;

        Ok(Self {
            service: service.into(),
            base_url,
            health_path: health_path.into(),
            client,
        })
    }

    /// Shared client for all instances, with connection pooling
    pub fn default_client(connect_timeout: Duration) -> GatewayResult<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?)
    }

    fn url_for(&self, path: &str) -> GatewayResult<Url> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| GatewayError::backend(&self.service, format!("Invalid target URL: {}", e)))
    }
}

#[async_trait]
impl ServiceBackend for HttpBackend {
    async fn invoke(&self, request: &ServiceRequest) -> GatewayResult<Value> {
        let mut url = self.url_for(&request.path)?;
        if !request.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_params.iter());
        }

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| GatewayError::backend(&self.service, e.to_string()))?;

        let mut builder = self
            .client
            .request(method, url)
            .header("x-request-id", &request.request_id);
        if let Some(principal) = &request.principal {
            builder = builder.header(PRINCIPAL_HEADER, principal);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::backend(&self.service, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::backend(
                &self.service,
                format!("upstream returned {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::backend(&self.service, e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }

    async fn health_check(&self) -> GatewayResult<()> {
        let url = self.url_for(&self.health_path)?;
        self.client.get(url).send().await?.error_for_status()?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}
