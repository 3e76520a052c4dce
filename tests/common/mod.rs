//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use school_roster::roster::{NewSchool, Registry, School};
use school_roster::{api, InMemoryStore, Repository};

/// Registry over a fresh in-memory store
pub fn memory_registry() -> (Arc<Registry>, InMemoryStore) {
    let store = InMemoryStore::new();
    let repo = Repository::new(Arc::new(store.clone()));
    (Arc::new(Registry::new(repo)), store)
}

/// Registry holding one school with max grade 6 under scene `scene`
pub async fn registry_with_school(scene: &str) -> (Arc<Registry>, Arc<School>, InMemoryStore) {
    let (registry, store) = memory_registry();
    let school = registry
        .create_school(NewSchool {
            name: format!("{} school", scene),
            scene: scene.to_string(),
            entity: format!("entity-{}", scene),
            max_grade: 6,
            operator: "admin".to_string(),
            ..Default::default()
        })
        .await
        .expect("Failed to create school");
    (registry, school, store)
}

/// API router over `registry`, mounted at the root
pub fn app(registry: Arc<Registry>) -> Router {
    api::create_router().with_state(registry)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Setup test database - truncate the record tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE records, sequences")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
