//! # Route Table
//!
//! Holds registered routes keyed by `METHOD:pattern` and resolves an incoming
//! `(method, path)` to a single route.
//!
//! ## Resolution
//!
//! 1. Exact key match: the head of that key's list (highest priority, earliest
//!    registration among equals) wins.
//! 2. Otherwise every key with the same method is tested against its precompiled
//!    [`PathPattern`]. When several patterns match, the most specific one wins:
//!    longest literal prefix, then most literal segments, then the higher head
//!    priority, then the key registered first. The result never depends on map
//!    iteration order.
//!
//! ## Rust Concepts Used
//!
//! - `parking_lot::RwLock` so lookups on the hot path only take a shared lock;
//!   registration is rare and takes the write lock
//! - `Arc<Route>` so a resolved route can outlive the lock guard

use axum::http::Method;
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::GatewayResult;
use crate::routing::route::{route_key, PathPattern, Route};

/// A resolved route with the parameters extracted from the path
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub path_params: HashMap<String, String>,
}

impl RouteMatch {
    /// Path to send to the backend for the given request path
    pub fn target_path(&self, request_path: &str) -> String {
        self.route.target_path_for(request_path, &self.path_params)
    }
}

/// All routes registered under one key
#[derive(Debug)]
struct RouteSlot {
    pattern: PathPattern,
    /// Registration sequence of the first route under this key
    registered: u64,
    /// Ordered by priority, descending; stable for equal priorities
    routes: Vec<Arc<Route>>,
}

/// Thread-safe route table
#[derive(Debug, Default)]
pub struct RouteTable {
    slots: RwLock<HashMap<String, RouteSlot>>,
    sequence: AtomicU64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route, keeping its key's list ordered by descending priority
    pub fn register(&self, route: Route) -> GatewayResult<Arc<Route>> {
        route.validate()?;
        let pattern = PathPattern::parse(&route.path_pattern)?;
        let route = Arc::new(route);
        let key = route.key();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.slots.write();
        let slot = slots.entry(key).or_insert_with(|| RouteSlot {
            pattern,
            registered: seq,
            routes: Vec::new(),
        });
        slot.routes.push(Arc::clone(&route));
        slot.routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(route)
    }

    /// Resolve a request to a route
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let slots = self.slots.read();

        if let Some(slot) = slots.get(&route_key(method, path)) {
            if slot.pattern.is_exact() {
                if let Some(head) = slot.routes.first() {
                    return Some(RouteMatch {
                        route: Arc::clone(head),
                        path_params: HashMap::new(),
                    });
                }
            }
        }

        let mut best = None;
        for slot in slots.values() {
            let Some(head) = slot.routes.first() else {
                continue;
            };
            if head.method != *method {
                continue;
            }
            let Some(params) = slot.pattern.matches(path) else {
                continue;
            };

            let rank = (
                slot.pattern.literal_prefix_len(),
                slot.pattern.literal_count(),
                head.priority,
                Reverse(slot.registered),
            );
            if best.as_ref().map_or(true, |(current, _)| rank > *current) {
                best = Some((
                    rank,
                    RouteMatch {
                        route: Arc::clone(head),
                        path_params: params,
                    },
                ));
            }
        }

        best.map(|(_, matched)| matched)
    }

    /// Every registered route, in no particular order
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.slots
            .read()
            .values()
            .flat_map(|slot| slot.routes.iter().cloned())
            .collect()
    }

    /// Distinct target services across all routes
    pub fn services(&self) -> HashSet<String> {
        self.slots
            .read()
            .values()
            .flat_map(|slot| slot.routes.iter().map(|r| r.target_service.clone()))
            .collect()
    }

    /// Total number of registered routes
    pub fn len(&self) -> usize {
        self.slots.read().values().map(|slot| slot.routes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
