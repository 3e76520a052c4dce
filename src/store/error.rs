//! Store Errors
//!
//! Error types for document store operations.

/// Errors that can occur in a record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No live document with this identifier
    #[error("Record not found in {collection}: {id}")]
    NotFound { collection: &'static str, id: String },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store could not be reached or refused the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored document has an unexpected shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl StoreError {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    /// Check if this error is a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
