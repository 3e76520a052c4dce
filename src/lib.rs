//! schoolRoster Library
//!
//! Re-exports modules for integration testing and the service binary.

pub mod api;
pub mod domain;
pub mod jobs;
pub mod roster;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{DomainError, EnrolDate, Page};
pub use roster::{Registry, RosterError, RosterResult, School};
pub use store::{InMemoryStore, PgStore, RecordStore, Repository, StoreError};
