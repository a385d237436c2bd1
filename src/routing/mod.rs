//! Route definitions and the route table.

pub mod route;
pub mod router;

pub use route::{PathPattern, Route, RoutePriority, RouteType};
pub use router::{RouteMatch, RouteTable};
