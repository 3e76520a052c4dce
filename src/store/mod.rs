//! Store module
//!
//! Document persistence behind the roster cache. Records are JSON documents
//! grouped in collections; every call is atomic on its own but there are no
//! cross-call transactions.

mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::domain::{Collection, Record};

// =========================================================================
// RecordStore trait
// =========================================================================

/// Persistence collaborator used by the roster
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a document, returning its new identifier
    async fn insert(&self, collection: Collection, document: Value) -> Result<String, StoreError>;

    /// Fetch a live document by identifier
    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Value, StoreError>;

    /// Fetch every document matching `filter`, in insertion order
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError>;

    /// Advance and return the named counter (first value is 1)
    async fn next_sequence(&self, name: &str) -> Result<u64, StoreError>;

    /// Overwrite top-level fields of a live document
    async fn update_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Overwrite top-level fields only while the live document matches
    /// `condition`. The check and the write are one atomic step.
    ///
    /// Returns `false` when the document exists but no longer matches.
    async fn update_fields_if(
        &self,
        collection: Collection,
        id: &str,
        condition: &Filter,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError>;

    /// Append `element` to the array stored under `field`
    async fn append_to_array(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        element: Value,
    ) -> Result<(), StoreError>;

    /// Remove every element of the array `field` selected by `matcher`
    async fn remove_from_array(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        matcher: &ArrayMatcher,
    ) -> Result<(), StoreError>;

    /// Mark a document deleted without erasing it
    async fn soft_delete(
        &self,
        collection: Collection,
        id: &str,
        operator: &str,
    ) -> Result<(), StoreError>;
}

// =========================================================================
// Filter
// =========================================================================

/// Conjunction of equality conditions on dotted field paths.
///
/// A path segment that lands on an array matches when any element matches,
/// and a final value that is an array matches when it contains the wanted
/// value. Soft-deleted documents are excluded unless [`Filter::with_deleted`]
/// is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
    include_deleted: bool,
}

impl Filter {
    /// Filter matching every live document
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single condition
    pub fn by(path: &str, value: impl Into<Value>) -> Self {
        Self::new().eq(path, value)
    }

    /// Add an equality condition
    pub fn eq(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((path.to_string(), value.into()));
        self
    }

    /// Also return soft-deleted documents
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Value) -> bool {
        if !self.include_deleted && is_deleted(document) {
            return false;
        }
        self.conditions.iter().all(|(path, wanted)| {
            let segments: Vec<&str> = path.split('.').collect();
            path_matches(document, &segments, wanted)
        })
    }
}

fn path_matches(current: &Value, segments: &[&str], wanted: &Value) -> bool {
    match segments.split_first() {
        None => match current {
            Value::Array(items) if !wanted.is_array() => items.iter().any(|v| v == wanted),
            other => other == wanted,
        },
        Some((head, rest)) => match current {
            Value::Array(items) => items.iter().any(|item| path_matches(item, segments, wanted)),
            Value::Object(map) => map
                .get(*head)
                .map(|next| path_matches(next, rest, wanted))
                .unwrap_or(false),
            _ => false,
        },
    }
}

/// Whether a document carries a deletion marker
pub fn is_deleted(document: &Value) -> bool {
    document
        .get("deleted_at")
        .map(|v| !v.is_null())
        .unwrap_or(false)
}

/// Selects array elements to remove
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayMatcher {
    /// Elements equal to the value
    Equals(Value),
    /// Object elements whose `key` field equals the value
    Field { key: String, value: Value },
}

impl ArrayMatcher {
    pub fn field(key: &str, value: impl Into<Value>) -> Self {
        Self::Field {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, element: &Value) -> bool {
        match self {
            ArrayMatcher::Equals(v) => element == v,
            ArrayMatcher::Field { key, value } => element.get(key) == Some(value),
        }
    }
}

// =========================================================================
// Typed repository
// =========================================================================

/// Typed access to a [`RecordStore`] for [`Record`] types
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Persist a new record.
    ///
    /// Assigns the sequence number and timestamps, then writes the
    /// store-issued identifier back into the record.
    pub async fn create<R: Record>(&self, record: &mut R) -> Result<(), StoreError> {
        let seq = self.store.next_sequence(R::COLLECTION.as_str()).await?;
        let now = Utc::now();
        {
            let meta = record.meta_mut();
            meta.seq = seq;
            meta.created_at = now;
            meta.updated_at = now;
            meta.deleted_at = None;
            if meta.operator.is_empty() {
                meta.operator = meta.creator.clone();
            }
        }
        let document = serde_json::to_value(&*record)?;
        let id = self.store.insert(R::COLLECTION, document).await?;
        record.meta_mut().id = id;
        Ok(())
    }

    pub async fn get<R: Record>(&self, id: &str) -> Result<R, StoreError> {
        let document = self.store.find_by_id(R::COLLECTION, id).await?;
        Ok(serde_json::from_value(document)?)
    }

    pub async fn find<R: Record>(&self, filter: &Filter) -> Result<Vec<R>, StoreError> {
        self.store
            .find_many(R::COLLECTION, filter)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }

    pub async fn find_one<R: Record>(&self, filter: &Filter) -> Result<Option<R>, StoreError> {
        Ok(self.find::<R>(filter).await?.into_iter().next())
    }

    /// Overwrite fields, stamping `operator` and `updated_at`.
    ///
    /// Returns the stamp so the caller can mirror it in memory.
    pub async fn update<R: Record>(
        &self,
        id: &str,
        operator: &str,
        fields: Value,
    ) -> Result<DateTime<Utc>, StoreError> {
        let Value::Object(mut fields) = fields else {
            return Err(StoreError::InvalidDocument(
                "update fields must be an object".to_string(),
            ));
        };
        let now = Utc::now();
        fields.insert("operator".to_string(), Value::String(operator.to_string()));
        fields.insert("updated_at".to_string(), serde_json::to_value(now)?);
        self.store.update_fields(R::COLLECTION, id, fields).await?;
        Ok(now)
    }

    /// Like [`Repository::update`], but only while the stored record
    /// matches `condition`. `None` means the guard failed and nothing was
    /// written.
    pub async fn update_if<R: Record>(
        &self,
        id: &str,
        operator: &str,
        condition: &Filter,
        fields: Value,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Value::Object(mut fields) = fields else {
            return Err(StoreError::InvalidDocument(
                "update fields must be an object".to_string(),
            ));
        };
        let now = Utc::now();
        fields.insert("operator".to_string(), Value::String(operator.to_string()));
        fields.insert("updated_at".to_string(), serde_json::to_value(now)?);
        let applied = self
            .store
            .update_fields_if(R::COLLECTION, id, condition, fields)
            .await?;
        Ok(applied.then_some(now))
    }

    pub async fn push<R: Record>(
        &self,
        id: &str,
        field: &str,
        element: &impl Serialize,
    ) -> Result<(), StoreError> {
        let element = serde_json::to_value(element)?;
        self.store
            .append_to_array(R::COLLECTION, id, field, element)
            .await
    }

    /// Overwrite one field without stamping the record
    pub async fn replace_field<R: Record>(
        &self,
        id: &str,
        field: &str,
        value: &impl Serialize,
    ) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert(field.to_string(), serde_json::to_value(value)?);
        self.store.update_fields(R::COLLECTION, id, fields).await
    }

    pub async fn pull<R: Record>(
        &self,
        id: &str,
        field: &str,
        matcher: &ArrayMatcher,
    ) -> Result<(), StoreError> {
        self.store
            .remove_from_array(R::COLLECTION, id, field, matcher)
            .await
    }

    pub async fn remove<R: Record>(&self, id: &str, operator: &str) -> Result<(), StoreError> {
        self.store.soft_delete(R::COLLECTION, id, operator).await
    }

    pub async fn next_sequence(&self, name: &str) -> Result<u64, StoreError> {
        self.store.next_sequence(name).await
    }
}
