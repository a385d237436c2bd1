//! # Service Discovery Module
//!
//! Backend services and how the gateway reaches them:
//!
//! - [`ServiceBackend`]: the invocation seam every instance implements
//! - [`ServiceRegistry`]: name → instances, round-robin dispatch, discovery listing
//! - [`HttpBackend`]: production instance over HTTP

pub mod backend;
pub mod http_backend;
pub mod registry;

pub use backend::{FnBackend, ServiceBackend};
pub use http_backend::{HttpBackend, PRINCIPAL_HEADER};
pub use registry::{DiscoveredService, RegistrationStatus, ServiceRegistry, ServiceSummary, SharedBackend};
