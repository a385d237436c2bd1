//! The backend-invocation seam.
//!
//! The gateway core never talks to the network directly. Every service instance is
//! a [`ServiceBackend`]; production wiring uses [`HttpBackend`], tests and in-process
//! services use [`FnBackend`] or their own implementations.
//!
//! [`HttpBackend`]: crate::discovery::HttpBackend

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::core::error::GatewayResult;
use crate::core::types::ServiceRequest;

/// One callable instance of a backend service
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Handle a routed request and return the service payload
    async fn invoke(&self, request: &ServiceRequest) -> GatewayResult<Value>;

    /// Liveness probe used by the health monitor
    async fn health_check(&self) -> GatewayResult<()> {
        Ok(())
    }

    /// Human-readable description (address, kind) for logs and status output
    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

/// Adapts a synchronous closure into a [`ServiceBackend`]
pub struct FnBackend<F> {
    handler: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&ServiceRequest) -> GatewayResult<Value> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> fmt::Debug for FnBackend<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBackend").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> ServiceBackend for FnBackend<F>
where
    F: Fn(&ServiceRequest) -> GatewayResult<Value> + Send + Sync,
{
    async fn invoke(&self, request: &ServiceRequest) -> GatewayResult<Value> {
        (self.handler)(request)
    }
}
