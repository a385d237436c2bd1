//! Authentication gating.
//!
//! The gateway does not verify tokens itself. For routes with `auth_required` it asks
//! an [`AuthProvider`] collaborator and forwards the returned principal to the
//! backend.

pub mod providers;

pub use providers::{ApiKeyAuthProvider, AuthOutcome, AuthProvider, DenyAllAuthProvider, API_KEY_HEADER};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GatewayRequest;
    use axum::http::Method;

    fn provider() -> ApiKeyAuthProvider {
        ApiKeyAuthProvider::default().with_key("secret-1", "alice")
    }

    #[tokio::test]
    async fn test_bearer_token_accepted() {
        let request = GatewayRequest::new(Method::GET, "/x").with_header("authorization", "Bearer secret-1");
        let outcome = provider().check_auth(&request).await;
        assert!(outcome.ok);
        assert_eq!(outcome.principal.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_api_key_header_accepted() {
        let request = GatewayRequest::new(Method::GET, "/x").with_header(API_KEY_HEADER, "secret-1");
        assert!(provider().check_auth(&request).await.ok);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_credentials_rejected() {
        let missing = provider().check_auth(&GatewayRequest::new(Method::GET, "/x")).await;
        assert!(!missing.ok);
        assert_eq!(missing.error.as_deref(), Some("missing credentials"));

        let wrong = GatewayRequest::new(Method::GET, "/x").with_header("authorization", "Bearer nope");
        assert_eq!(
            provider().check_auth(&wrong).await,
            AuthOutcome::deny("invalid API key")
        );

        let basic = GatewayRequest::new(Method::GET, "/x").with_header("authorization", "Basic abc");
        assert!(!provider().check_auth(&basic).await.ok);
    }

    #[tokio::test]
    async fn test_deny_all() {
        let outcome = DenyAllAuthProvider.check_auth(&GatewayRequest::new(Method::GET, "/x")).await;
        assert!(!outcome.ok);
    }
}
