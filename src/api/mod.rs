//! API module
//!
//! HTTP API endpoints over the roster registry.

pub mod routes;

pub use routes::{create_router, AppState};
