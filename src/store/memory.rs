//! In-memory record store
//!
//! Thread-safe [`RecordStore`] kept entirely in process memory. Used by the
//! test suites and for running the service without a database. Writes can be
//! switched to fail so callers can observe store-first ordering.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{is_deleted, ArrayMatcher, Filter, RecordStore, StoreError};
use crate::domain::Collection;

/// Documents kept in insertion order per collection
#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, Vec<Value>>,
    sequences: HashMap<String, u64>,
}

/// In-memory document store
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of documents in a collection, deleted ones included
    pub fn len(&self, collection: Collection) -> usize {
        self.read()
            .map(|inner| inner.collections.get(&collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }

    /// Raw document lookup that ignores deletion markers
    pub fn raw(&self, collection: Collection, id: &str) -> Option<Value> {
        let inner = self.read().ok()?;
        inner
            .collections
            .get(&collection)?
            .iter()
            .find(|doc| doc_id(doc) == Some(id))
            .cloned()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Apply `f` to the live document `id`
    fn modify<F>(&self, collection: Collection, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), StoreError>,
    {
        let mut inner = self.write()?;
        let document = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|doc| doc_id(doc) == Some(id) && !is_deleted(doc))
            })
            .ok_or_else(|| StoreError::not_found(collection.as_str(), id))?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument(format!("{} is not an object", id)))?;
        f(object)
    }
}

fn doc_id(document: &Value) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}

fn array_field<'a>(
    object: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Vec<Value>, StoreError> {
    let slot = object
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| StoreError::InvalidDocument(format!("field {} is not an array", field)))
}

#[async_trait]
impl RecordStore for InMemoryStore {
    #[instrument(skip(self, document))]
    async fn insert(&self, collection: Collection, mut document: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let object = document
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument("document is not an object".to_string()))?;
        object.insert("id".to_string(), Value::String(id.clone()));

        let mut inner = self.write()?;
        inner.collections.entry(collection).or_default().push(document);
        debug!(collection = collection.as_str(), %id, "Inserted document");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Value, StoreError> {
        let inner = self.read()?;
        inner
            .collections
            .get(&collection)
            .and_then(|docs| {
                docs.iter()
                    .find(|doc| doc_id(doc) == Some(id) && !is_deleted(doc))
            })
            .cloned()
            .ok_or_else(|| StoreError::not_found(collection.as_str(), id))
    }

    #[instrument(skip(self))]
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .collections
            .get(&collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let value = inner.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    #[instrument(skip(self, fields))]
    async fn update_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.modify(collection, id, |object| {
            for (key, value) in fields {
                object.insert(key, value);
            }
            Ok(())
        })
    }

    #[instrument(skip(self, fields))]
    async fn update_fields_if(
        &self,
        collection: Collection,
        id: &str,
        condition: &Filter,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let document = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|doc| doc_id(doc) == Some(id) && !is_deleted(doc))
            })
            .ok_or_else(|| StoreError::not_found(collection.as_str(), id))?;
        if !condition.matches(document) {
            debug!(collection = collection.as_str(), %id, "Conditional update skipped");
            return Ok(false);
        }
        let object = document
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument(format!("{} is not an object", id)))?;
        for (key, value) in fields {
            object.insert(key, value);
        }
        Ok(true)
    }

    #[instrument(skip(self, element))]
    async fn append_to_array(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        element: Value,
    ) -> Result<(), StoreError> {
        self.modify(collection, id, |object| {
            array_field(object, field)?.push(element);
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn remove_from_array(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        matcher: &ArrayMatcher,
    ) -> Result<(), StoreError> {
        self.modify(collection, id, |object| {
            array_field(object, field)?.retain(|element| !matcher.matches(element));
            Ok(())
        })
    }

    #[instrument(skip(self))]
    async fn soft_delete(
        &self,
        collection: Collection,
        id: &str,
        operator: &str,
    ) -> Result<(), StoreError> {
        let now = serde_json::to_value(Utc::now())?;
        self.modify(collection, id, |object| {
            object.insert("deleted_at".to_string(), now.clone());
            object.insert("updated_at".to_string(), now);
            object.insert("operator".to_string(), Value::String(operator.to_string()));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_assigns_id_and_find_by_id() {
        let store = InMemoryStore::new();
        let id = store
            .insert(Collection::Schools, json!({"name": "North"}))
            .await
            .unwrap();

        let doc = store.find_by_id(Collection::Schools, &id).await.unwrap();
        assert_eq!(doc["id"], json!(id));
        assert_eq!(doc["name"], json!("North"));

        let err = store.find_by_id(Collection::Schools, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_find_many_keeps_insertion_order() {
        let store = InMemoryStore::new();
        for name in ["a", "b", "c"] {
            store
                .insert(Collection::Classes, json!({"school": "s", "name": name}))
                .await
                .unwrap();
        }
        store
            .insert(Collection::Classes, json!({"school": "other", "name": "d"}))
            .await
            .unwrap();

        let docs = store
            .find_many(Collection::Classes, &Filter::by("school", "s"))
            .await
            .unwrap();
        let names: Vec<_> = docs.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic_per_name() {
        let store = InMemoryStore::new();
        assert_eq!(store.next_sequence("students").await.unwrap(), 1);
        assert_eq!(store.next_sequence("students").await.unwrap(), 2);
        assert_eq!(store.next_sequence("classes").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_array_edits() {
        let store = InMemoryStore::new();
        let id = store
            .insert(Collection::Classes, json!({"members": []}))
            .await
            .unwrap();

        store
            .append_to_array(Collection::Classes, &id, "members", json!({"student": "s1"}))
            .await
            .unwrap();
        store
            .append_to_array(Collection::Classes, &id, "members", json!({"student": "s2"}))
            .await
            .unwrap();
        store
            .remove_from_array(
                Collection::Classes,
                &id,
                "members",
                &ArrayMatcher::field("student", "s1"),
            )
            .await
            .unwrap();

        let doc = store.find_by_id(Collection::Classes, &id).await.unwrap();
        assert_eq!(doc["members"], json!([{"student": "s2"}]));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_but_keeps_document() {
        let store = InMemoryStore::new();
        let id = store
            .insert(Collection::Students, json!({"school": "s"}))
            .await
            .unwrap();
        store.soft_delete(Collection::Students, &id, "admin").await.unwrap();

        assert!(store.find_by_id(Collection::Students, &id).await.is_err());
        let live = store
            .find_many(Collection::Students, &Filter::by("school", "s"))
            .await
            .unwrap();
        assert!(live.is_empty());

        let raw = store.raw(Collection::Students, &id).unwrap();
        assert_eq!(raw["operator"], json!("admin"));
        assert!(!raw["deleted_at"].is_null());
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        let err = store
            .insert(Collection::Schools, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty(Collection::Schools));

        store.set_fail_writes(false);
        assert!(store.insert(Collection::Schools, json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = InMemoryStore::new();
        let err = store
            .update_fields(Collection::Schools, "missing", Map::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_conditional_update_applies_once() {
        let store = InMemoryStore::new();
        let id = store
            .insert(Collection::Students, json!({"entity": ""}))
            .await
            .unwrap();
        let unbound = Filter::by("entity", "");

        let mut first = Map::new();
        first.insert("entity".to_string(), json!("token-1"));
        assert!(store
            .update_fields_if(Collection::Students, &id, &unbound, first)
            .await
            .unwrap());

        let mut second = Map::new();
        second.insert("entity".to_string(), json!("token-2"));
        assert!(!store
            .update_fields_if(Collection::Students, &id, &unbound, second)
            .await
            .unwrap());

        let doc = store.find_by_id(Collection::Students, &id).await.unwrap();
        assert_eq!(doc["entity"], json!("token-1"));

        let err = store
            .update_fields_if(Collection::Students, "missing", &unbound, Map::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
