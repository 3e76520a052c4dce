//! API Integration Tests
//!
//! Drive the router with `oneshot` over an in-memory store.

use axum::http::StatusCode;
use serde_json::json;
use tower::util::ServiceExt;

mod common;

use common::{body_json, empty_request, json_request};

const CARD: &str = "110105201409010011";

#[tokio::test]
async fn test_school_create_and_lookup() {
    let (registry, _) = common::memory_registry();
    let app = common::app(registry);

    let req = json_request(
        "POST",
        "/schools",
        json!({"name": "East", "scene": "east", "entity": "e-east", "max_grade": 3, "operator": "admin"}),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["max_grade"], 6);
    let id = created["id"].as_str().unwrap().to_string();

    for key in ["east".to_string(), id.clone()] {
        let response = app
            .clone()
            .oneshot(empty_request("GET", &format!("/schools/{}", key)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["id"], id.as_str());
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/schools?page=1&number=10"))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["max_page"], 1);
}

#[tokio::test]
async fn test_school_errors_map_to_status_codes() {
    let (registry, _) = common::memory_registry();
    let app = common::app(registry);

    let req = json_request("POST", "/schools", json!({"name": "No scene", "entity": "e"}));
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "validation_failed");

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/schools/nowhere"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error_code"], "not_found");
}

#[tokio::test]
async fn test_class_top_up_over_http() {
    let (registry, _, _) = common::registry_with_school("west").await;
    let app = common::app(registry);

    for _ in 0..2 {
        let req = json_request(
            "POST",
            "/schools/west/classes",
            json!({"name": "2022", "enrol": "2022/9/1", "count": 2, "operator": "admin"}),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/schools/west/classes"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 2);
}

#[tokio::test]
async fn test_student_lifecycle_over_http() {
    let (registry, _, _) = common::registry_with_school("south").await;
    let app = common::app(registry);

    let req = json_request(
        "POST",
        "/schools/south/classes",
        json!({"name": "2023", "enrol": "2023/9/1", "count": 1}),
    );
    let classes = body_json(app.clone().oneshot(req).await.unwrap()).await;
    let class_id = classes[0]["id"].as_str().unwrap().to_string();

    // Same card twice yields one student
    let mut ids = Vec::new();
    for _ in 0..2 {
        let req = json_request(
            "POST",
            "/schools/south/students",
            json!({"name": "Chen", "card": CARD, "class": class_id, "operator": "admin"}),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["class"], class_id.as_str());
        ids.push(body["student"]["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);
    let student = &ids[0];

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/schools/south/students?status=1"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["total"], 1);

    // Entity binding is immutable
    let uri = format!("/schools/south/students/{}/entity", student);
    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, json!({"entity": "token-1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .clone()
        .oneshot(json_request("POST", &uri, json!({"entity": "token-2"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Bound students cannot be removed
    let uri = format!("/schools/south/students/{}?operator=admin", student);
    let response = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_remove_and_status_endpoints() {
    let (registry, _, _) = common::registry_with_school("north").await;
    let app = common::app(registry);

    let req = json_request("POST", "/schools/north/students", json!({"name": "Sun"}));
    let body = body_json(app.clone().oneshot(req).await.unwrap()).await;
    let student = body["student"]["id"].as_str().unwrap().to_string();
    assert!(body["class"].is_null());

    let uri = format!("/schools/north/students/{}/status", student);
    let response = app
        .clone()
        .oneshot(json_request("PUT", &uri, json!({"status": 99})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request("PUT", &uri, json!({"status": 3, "operator": "admin"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], 3);

    let uri = format!("/schools/north/students/{}", student);
    let response = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/schools/north/students"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["total"], 0);
}
