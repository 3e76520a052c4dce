//! PostgreSQL record store
//!
//! Documents live in a single `records` table as JSONB, keyed by
//! `(collection, id)`. Filters compile to SQL/JSON path predicates so array
//! fields match on any element.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ArrayMatcher, Filter, RecordStore, StoreError};
use crate::domain::Collection;

/// Record store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Render a dotted field path as a lax-mode JSON path that unwraps arrays
/// at every step and compares against the `$v` variable.
fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path.split('.') {
        let escaped = segment.replace('\\', "\\\\").replace('"', "\\\"");
        out.push_str(&format!(".\"{}\"[*]", escaped));
    }
    out.push_str(" ? (@ == $v)");
    out
}

/// One `jsonb_path_exists` clause per filter condition, numbering bind
/// parameters from `first`.
fn path_predicates(filter: &Filter, first: usize) -> String {
    (0..filter.conditions().len())
        .map(|i| {
            let param = first + i * 2;
            format!(
                " AND jsonb_path_exists(document, ${}::jsonpath, ${})",
                param,
                param + 1
            )
        })
        .collect()
}

/// SQL fragment that yields `field` as an array (empty when absent)
const ARRAY_OR_EMPTY: &str =
    "CASE WHEN jsonb_typeof(document->$3) = 'array' THEN document->$3 ELSE '[]'::jsonb END";

#[async_trait]
impl RecordStore for PgStore {
    #[instrument(skip(self, document))]
    async fn insert(&self, collection: Collection, mut document: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let object = document
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidDocument("document is not an object".to_string()))?;
        object.insert("id".to_string(), Value::String(id.clone()));

        sqlx::query(
            r#"
            INSERT INTO records (collection, id, document)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(collection.as_str())
        .bind(&id)
        .bind(&document)
        .execute(&self.pool)
        .await?;

        debug!(collection = collection.as_str(), %id, "Inserted document");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, collection: Collection, id: &str) -> Result<Value, StoreError> {
        let document: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT document FROM records
            WHERE collection = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        document.ok_or_else(|| StoreError::not_found(collection.as_str(), id))
    }

    #[instrument(skip(self))]
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        let mut sql = String::from("SELECT document FROM records WHERE collection = $1");
        if !filter.includes_deleted() {
            sql.push_str(" AND deleted_at IS NULL");
        }
        sql.push_str(&path_predicates(filter, 2));
        sql.push_str(" ORDER BY position ASC");

        let mut query = sqlx::query_scalar::<_, Value>(&sql).bind(collection.as_str());
        for (path, value) in filter.conditions() {
            query = query.bind(json_path(path)).bind(json!({ "v": value }));
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn next_sequence(&self, name: &str) -> Result<u64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(value as u64)
    }

    #[instrument(skip(self, fields))]
    async fn update_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE records SET document = document || $3
            WHERE collection = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Value::Object(fields))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        Ok(())
    }

    #[instrument(skip(self, fields))]
    async fn update_fields_if(
        &self,
        collection: Collection,
        id: &str,
        condition: &Filter,
        fields: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE records SET document = document || $3 \
             WHERE collection = $1 AND id = $2 AND deleted_at IS NULL{}",
            path_predicates(condition, 4)
        );
        let mut query = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(id)
            .bind(Value::Object(fields));
        for (path, value) in condition.conditions() {
            query = query.bind(json_path(path)).bind(json!({ "v": value }));
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            // Distinguish a failed guard from a missing document.
            self.find_by_id(collection, id).await?;
            debug!(collection = collection.as_str(), %id, "Conditional update skipped");
            return Ok(false);
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
        let sql = format!(
            r#"
            UPDATE records
            SET document = jsonb_set(document, ARRAY[$3]::text[], ({}) || jsonb_build_array($4::jsonb))
            WHERE collection = $1 AND id = $2 AND deleted_at IS NULL
            "#,
            ARRAY_OR_EMPTY
        );
        let result = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(id)
            .bind(field)
            .bind(&element)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_from_array(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        matcher: &ArrayMatcher,
    ) -> Result<(), StoreError> {
        let (predicate, operand) = match matcher {
            ArrayMatcher::Equals(value) => ("e = $4::jsonb", value.clone()),
            ArrayMatcher::Field { key, value } => {
                let mut object = Map::new();
                object.insert(key.clone(), value.clone());
                ("e @> $4::jsonb", Value::Object(object))
            }
        };
        let sql = format!(
            r#"
            UPDATE records
            SET document = jsonb_set(
                document,
                ARRAY[$3]::text[],
                COALESCE(
                    (SELECT jsonb_agg(t.e ORDER BY t.idx) FROM jsonb_array_elements({}) WITH ORDINALITY AS t(e, idx) WHERE NOT ({})),
                    '[]'::jsonb
                )
            )
            WHERE collection = $1 AND id = $2 AND deleted_at IS NULL
            "#,
            ARRAY_OR_EMPTY, predicate
        );
        let result = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(id)
            .bind(field)
            .bind(&operand)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn soft_delete(
        &self,
        collection: Collection,
        id: &str,
        operator: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let patch = json!({
            "deleted_at": now,
            "updated_at": now,
            "operator": operator,
        });
        let result = sqlx::query(
            r#"
            UPDATE records SET deleted_at = $3, document = document || $4
            WHERE collection = $1 AND id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(now)
        .bind(&patch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection.as_str(), id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_path_unwraps_every_segment() {
        assert_eq!(json_path("school"), r#"$."school"[*] ? (@ == $v)"#);
        assert_eq!(
            json_path("custodians.phones"),
            r#"$."custodians"[*]."phones"[*] ? (@ == $v)"#
        );
    }

    #[test]
    fn test_path_predicates_number_parameters() {
        let filter = Filter::by("entity", "").eq("school", "s1");
        assert_eq!(
            path_predicates(&filter, 4),
            " AND jsonb_path_exists(document, $4::jsonpath, $5) \
             AND jsonb_path_exists(document, $6::jsonpath, $7)"
        );
        assert_eq!(path_predicates(&Filter::new(), 2), "");
    }

    #[test]
    fn test_json_path_escapes_quotes() {
        assert_eq!(json_path(r#"a"b"#), r#"$."a\"b"[*] ? (@ == $v)"#);
    }
}
