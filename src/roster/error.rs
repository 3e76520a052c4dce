//! Roster Errors
//!
//! The error taxonomy returned by every roster operation.

use crate::domain::DomainError;
use crate::store::StoreError;

/// Roster-wide Result type
pub type RosterResult<T> = Result<T, RosterError>;

/// Errors returned by registry and aggregate operations
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    /// Empty or malformed input, rejected before touching storage
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Lookup missed both cache and store
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Duplicate name, rebinding, or similar state clash
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store call itself failed; never retried here
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl RosterError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Check if this is a client error (caller's input or state)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Conflict(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<StoreError> for RosterError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => Self::NotFound {
                kind: collection,
                key: id,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<DomainError> for RosterError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Reject an empty required argument
pub(crate) fn require(value: &str, field: &'static str) -> RosterResult<()> {
    if value.trim().is_empty() {
        return Err(RosterError::Validation(format!("{} is empty", field)));
    }
    Ok(())
}
