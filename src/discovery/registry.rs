//! # Service Registry
//!
//! Maps a service name to its callable instances and dispatches round-robin.
//! The registry is a pure dispatcher: circuit breaking, metrics and health are the
//! gateway's concern, never touched here.
//!
//! Services can also be *discovered*: recorded by name and address for
//! self-registration flows without a live instance handle. Discovered services show
//! up in listings but cannot be dispatched to until instances are registered.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap` for lock-free reads of the name → registration map
//! - `AtomicUsize::fetch_add` for the round-robin cursor, wrapping modulo the
//!   instance count
//! - `Arc` clones so no map guard is held across the backend `.await`

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::backend::ServiceBackend;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::ServiceRequest;

/// Shared handle to a backend instance
pub type SharedBackend = Arc<dyn ServiceBackend>;

struct ServiceRegistration {
    instances: Vec<SharedBackend>,
    next: AtomicUsize,
}

impl ServiceRegistration {
    fn new(instances: Vec<SharedBackend>) -> Self {
        Self {
            instances,
            next: AtomicUsize::new(0),
        }
    }

    fn select(&self) -> Option<&SharedBackend> {
        if self.instances.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        self.instances.get(index)
    }
}

/// An externally announced service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DiscoveredService {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Has live instance handles
    Registered,
    /// Known by address only
    Discovered,
}

/// Listing entry for one service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub status: RegistrationStatus,
    pub instances: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Registry of callable services
#[derive(Default)]
pub struct ServiceRegistry {
    services: DashMap<String, Arc<ServiceRegistration>>,
    discovered: DashMap<String, DiscoveredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single instance, replacing any previous instances
    pub fn register(&self, service: &str, backend: SharedBackend) {
        self.register_instances(service, vec![backend]);
    }

    /// Register the instances to rotate through, replacing any previous ones
    pub fn register_instances(&self, service: &str, instances: Vec<SharedBackend>) {
        info!(
            service = %service,
            instances = instances.len(),
            "Registered service instances"
        );
        self.services
            .insert(service.to_string(), Arc::new(ServiceRegistration::new(instances)));
    }

    /// Record services by name and address without instance handles
    pub fn discover(&self, services: Vec<DiscoveredService>) -> usize {
        let count = services.len();
        for service in services {
            info!(service = %service.name, address = %service.address, "Discovered service");
            self.discovered.insert(service.name.clone(), service);
        }
        count
    }

    /// Dispatch to the next instance of `service`
    pub async fn invoke(&self, service: &str, request: &ServiceRequest) -> GatewayResult<Value> {
        let registration = self
            .services
            .get(service)
            .map(|entry| Arc::clone(entry.value()));

        let Some(registration) = registration else {
            let message = match self.discovered.get(service) {
                Some(found) => format!(
                    "service discovered at {} has no registered instances",
                    found.address
                ),
                None => "service is not registered".to_string(),
            };
            return Err(GatewayError::backend(service, message));
        };

        let instance = registration
            .select()
            .ok_or_else(|| GatewayError::backend(service, "service has no instances"))?;

        debug!(service = %service, instance = %instance.describe(), "Dispatching request");
        instance.invoke(request).await
    }

    /// Instances of a service, for health probing
    pub fn instances(&self, service: &str) -> Vec<SharedBackend> {
        self.services
            .get(service)
            .map(|entry| entry.instances.clone())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// Names of services with instance handles
    pub fn registered_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Every known service, registered or discovered
    pub fn summaries(&self) -> Vec<ServiceSummary> {
        let mut summaries: Vec<ServiceSummary> = self
            .services
            .iter()
            .map(|entry| ServiceSummary {
                name: entry.key().clone(),
                status: RegistrationStatus::Registered,
                instances: entry.instances.iter().map(|i| i.describe()).collect(),
                address: None,
            })
            .collect();

        for entry in self.discovered.iter() {
            if self.services.contains_key(entry.key()) {
                continue;
            }
            summaries.push(ServiceSummary {
                name: entry.key().clone(),
                status: RegistrationStatus::Discovered,
                instances: Vec::new(),
                address: Some(entry.address.clone()),
            });
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}
