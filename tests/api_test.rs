//! End-to-end test of the management API driving a real tenant lifecycle
//! against an embedded broker and a mock backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{start_broker, MockBackend};
use mqtt_webhook_bridge::api::{build_router, AppState};
use mqtt_webhook_bridge::supervisor::Supervisor;
use tower::ServiceExt;

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_full_tenant_lifecycle_over_http() {
    let _broker = start_broker(18910).await;
    let backend = MockBackend::start().await;
    let app = build_router(AppState {
        supervisor: Arc::new(Supervisor::new()),
    });

    // Register the tenant.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/clients/add",
            serde_json::json!({
                "tenant_id": 1,
                "backend_url": backend.base_url(),
                "backend_token": "token-1",
                "mqtt_host": "127.0.0.1",
                "mqtt_port": 18910
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["tenant_id"], 1);
    assert_eq!(body["running"], true);

    // Duplicate registration conflicts and leaves the runner alone.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/clients/add",
            serde_json::json!({
                "tenant_id": 1,
                "backend_url": backend.base_url(),
                "backend_token": "token-1",
                "mqtt_host": "127.0.0.1",
                "mqtt_port": 18910
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json(response).await;
    assert_eq!(body["code"], "duplicate_tenant");

    // The listing shows the tenant with secrets redacted.
    let response = app.clone().oneshot(get_request("/clients")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body[0]["tenant_id"], 1);
    assert_eq!(body[0]["backend_token"], "<redacted>");

    // Wait for the connection, observed through the status route.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = app
            .clone()
            .oneshot(get_request("/clients/1/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        if body["connected"] == true {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tenant never reported connected"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Add a subscription and watch it appear in the listing.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/add",
            serde_json::json!({ "id": 4, "tenant_id": 1, "topic": "sensors/temp" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["id"], 4);
    assert_eq!(body["topic"], "sensors/temp");

    let response = app
        .clone()
        .oneshot(get_request("/subscriptions"))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    // Remove it again.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/subscriptions/4/remove",
            serde_json::json!({ "tenant_id": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get_request("/subscriptions/4/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Stop the tenant; afterwards status is gone.
    let response = app
        .clone()
        .oneshot(json_request("POST", "/clients/1/stop", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["running"], false);

    let response = app
        .clone()
        .oneshot(get_request("/clients/1/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
