//! Core building blocks shared by every other module: errors, request and response
//! types, configuration and the injectable clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;
