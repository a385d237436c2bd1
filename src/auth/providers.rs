use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use std::collections::HashMap;
use tracing::debug;

use crate::core::types::GatewayRequest;

/// Header accepted as an alternative to `Authorization: Bearer`
pub const API_KEY_HEADER: &str = "x-api-key";

/// Result of an auth check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub ok: bool,
    pub principal: Option<String>,
    pub error: Option<String>,
}

impl AuthOutcome {
    pub fn allow(principal: impl Into<String>) -> Self {
        Self {
            ok: true,
            principal: Some(principal.into()),
            error: None,
        }
    }

    pub fn deny(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            principal: None,
            error: Some(error.into()),
        }
    }
}

/// The auth collaborator, called only for routes that require auth
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn check_auth(&self, request: &GatewayRequest) -> AuthOutcome;
}

/// Static API keys mapped to principals
#[derive(Debug, Clone, Default)]
pub struct ApiKeyAuthProvider {
    keys: HashMap<String, String>,
}

impl ApiKeyAuthProvider {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    pub fn with_key(mut self, key: impl Into<String>, principal: impl Into<String>) -> Self {
        self.keys.insert(key.into(), principal.into());
        self
    }

    fn extract_key(request: &GatewayRequest) -> Option<&str> {
        if let Some(value) = request.header(AUTHORIZATION.as_str()) {
            let (scheme, token) = value.split_once(' ')?;
            if scheme.eq_ignore_ascii_case("bearer") {
                return Some(token.trim());
            }
            return None;
        }
        request.header(API_KEY_HEADER).map(str::trim)
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuthProvider {
    async fn check_auth(&self, request: &GatewayRequest) -> AuthOutcome {
        let Some(key) = Self::extract_key(request) else {
            return AuthOutcome::deny("missing credentials");
        };

        match self.keys.get(key) {
            Some(principal) => {
                debug!(request_id = %request.id, principal = %principal, "API key accepted");
                AuthOutcome::allow(principal.clone())
            }
            None => AuthOutcome::deny("invalid API key"),
        }
    }
}

/// Rejects everything; the default when no provider is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllAuthProvider;

#[async_trait]
impl AuthProvider for DenyAllAuthProvider {
    async fn check_auth(&self, _request: &GatewayRequest) -> AuthOutcome {
        AuthOutcome::deny("no auth provider configured")
    }
}
