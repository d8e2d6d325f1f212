//! Integration tests for the Strata Server API endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use strata_core::ids::{ServiceId, ServiceTypeId};
use strata_core::{DataType, PermissionLevel, PermissionRow};
use strata_engine::StrataEngineBuilder;
use strata_server::routes::create_router;
use strata_storage::{GrantSubject, InMemoryStore};
use strata_traits::{EngineConfig, StorageAdapter};

/// Create a test app over a fresh in-memory store.
fn create_test_app() -> (axum::Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = StrataEngineBuilder::new()
        .with_config(EngineConfig::default())
        .with_storage(StorageAdapter::from_store(store.clone()))
        .build()
        .expect("Failed to build engine");
    (create_router(Arc::new(engine)), store)
}

/// Helper to make a POST request and get JSON response.
async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!({}));

    (status, json)
}

/// Helper to make a GET request and get JSON response.
async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!({}));

    (status, json)
}

/// Creates `env` with `prod` and `qa -> qa1`, linked to service type 1.
/// Returns the value id of `qa`.
async fn seed_hierarchy(app: &axum::Router) -> (u64, u64) {
    let (status, property) = post_json(
        app.clone(),
        "/api/v1/hierarchy/properties",
        json!({"name": "env", "display_name": "Environment"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let env = property["id"].as_u64().unwrap();

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/hierarchy/values",
        json!({"property_id": env, "value": "prod"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, qa) = post_json(
        app.clone(),
        "/api/v1/hierarchy/values",
        json!({"property_id": env, "value": "qa"}),
    )
    .await;
    let qa = qa["id"].as_u64().unwrap();

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/hierarchy/values",
        json!({"property_id": env, "parent_id": qa, "value": "qa1"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/hierarchy/service-types/1/properties",
        json!({"property_id": env}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    (env, qa)
}

async fn context_for(app: &axum::Router, variation: Value) -> strata_core::ids::ContextId {
    let (status, body) = post_json(
        app.clone(),
        "/api/v1/variation-contexts",
        json!({"service_type_id": 1, "variation": variation}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    strata_core::ids::ContextId(body["id"].as_u64().unwrap())
}

// =============================================================================
// HEALTH CHECK TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();
    let (status, body) = get_json(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// =============================================================================
// HIERARCHY TESTS
// =============================================================================

#[tokio::test]
async fn test_hierarchy_tree() {
    let (app, _) = create_test_app();
    seed_hierarchy(&app).await;

    let (status, body) = get_json(app, "/api/v1/hierarchy").await;
    assert_eq!(status, StatusCode::OK);

    let properties = body["properties"].as_array().unwrap();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0]["name"], "env");
    assert_eq!(properties[0]["max_depth"], 1);

    let roots = properties[0]["values"].as_array().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[1]["value"], "qa");
    assert_eq!(roots[1]["children"][0]["value"], "qa1");
    assert_eq!(roots[1]["children"][0]["depth"], 1);
}

#[tokio::test]
async fn test_duplicate_property_is_bad_request() {
    let (app, _) = create_test_app();
    seed_hierarchy(&app).await;

    let (status, body) = post_json(
        app,
        "/api/v1/hierarchy/properties",
        json!({"name": "env", "display_name": "Again"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
}

#[tokio::test]
async fn test_archived_value_conflicts() {
    let (app, _) = create_test_app();
    let (_, qa) = seed_hierarchy(&app).await;

    let (status, _) = post_json(
        app.clone(),
        &format!("/api/v1/hierarchy/values/{qa}/archive"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/variation-contexts",
        json!({"service_type_id": 1, "variation": {"env": "qa"}}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_operation");

    let (status, _) = post_json(
        app.clone(),
        &format!("/api/v1/hierarchy/values/{qa}/archive"),
        json!({"archived": false}),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    context_for(&app, json!({"env": "qa"})).await;
}

#[tokio::test]
async fn test_unknown_value_not_found() {
    let (app, _) = create_test_app();
    seed_hierarchy(&app).await;

    let (status, _) = post_json(app, "/api/v1/hierarchy/values/9999/archive", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// CONFIGURATION TESTS
// =============================================================================

#[tokio::test]
async fn test_configuration_resolution() {
    let (app, store) = create_test_app();
    seed_hierarchy(&app).await;

    let service = store.create_service("billing", ServiceTypeId(1)).unwrap();
    let version = store.create_service_version(service, 1, true).unwrap();
    let feature = store.create_feature(version, "limits").unwrap();
    let key = store.create_key(feature, "settings", DataType::Json).unwrap();

    let default = context_for(&app, json!({})).await;
    let qa = context_for(&app, json!({"env": "qa"})).await;
    store.put_value(key, default, r#"{"x":{"y":1,"z":2}}"#).unwrap();
    store.put_value(key, qa, r#"{"x":{"y":9}}"#).unwrap();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/configuration",
        json!({"services": ["billing"], "variation": {"env": "qa1"}, "production": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["changeset_id"], 0);

    let values = &body["features"][0]["keys"][0]["values"];
    assert_eq!(values.as_array().unwrap().len(), 1);
    let data: Value = serde_json::from_str(values[0]["data"].as_str().unwrap()).unwrap();
    assert_eq!(data, json!({"x": {"y": 9, "z": 2}}));

    let (status, body) = post_json(app, "/api/v1/configuration", json!({"services": ["billing"]})).await;
    assert_eq!(status, StatusCode::OK);
    let values = body["features"][0]["keys"][0]["values"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(values.len(), 2);
    assert_eq!(values[1]["variation"], json!({"env": "qa"}));
    assert!(values[1]["rank"].as_u64().unwrap() > values[0]["rank"].as_u64().unwrap());
}

#[tokio::test]
async fn test_configuration_errors() {
    let (app, store) = create_test_app();
    seed_hierarchy(&app).await;
    let service = store.create_service("billing", ServiceTypeId(1)).unwrap();
    store.create_service_version(service, 1, false).unwrap();

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/configuration",
        json!({"services": ["billing:one"]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        app.clone(),
        "/api/v1/configuration",
        json!({"services": ["inventory"]}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/configuration",
        json!({"services": ["billing"], "production": true}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_operation");

    let (status, _) = post_json(
        app,
        "/api/v1/configuration",
        json!({"services": ["billing"], "variation": {"env": "staging"}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// PERMISSION TESTS
// =============================================================================

#[tokio::test]
async fn test_permission_check() {
    let (app, store) = create_test_app();
    let (env, _) = seed_hierarchy(&app).await;

    let user = store.create_user(Some("dev@example.com"), false);
    store
        .grant(
            GrantSubject::User(user),
            PermissionRow {
                service_id: ServiceId(7),
                feature_id: Some(8.into()),
                key_id: Some(9.into()),
                variation: [(env.into(), "qa".to_string())].into_iter().collect(),
                level: PermissionLevel::Owner,
            },
        )
        .unwrap();

    let (status, body) = post_json(
        app.clone(),
        "/api/v1/permissions/check",
        json!({
            "user_id": user,
            "scope": {"service_id": 7, "feature_id": 8, "key_id": 9},
            "variation": {"env": "qa1"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], "owner");
    assert_eq!(body["has_nested_permission"], true);

    let (_, body) = post_json(
        app.clone(),
        "/api/v1/permissions/check",
        json!({"user_id": user, "scope": {"service_id": 7}}),
    )
    .await;
    assert_eq!(body["level"], "viewer");
    assert_eq!(body["has_nested_permission"], true);

    let (_, body) = post_json(
        app.clone(),
        "/api/v1/permissions/check",
        json!({"scope": {"service_id": 7}}),
    )
    .await;
    assert_eq!(body["level"], "viewer");
    assert_eq!(body["has_nested_permission"], false);

    let (status, _) = post_json(
        app,
        "/api/v1/permissions/check",
        json!({"user_id": 123456, "scope": {"service_id": 7}}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
