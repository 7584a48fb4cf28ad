//! Management API
//!
//! Thin HTTP layer over the supervisor's public contract. Handlers contain
//! no state of their own; every operation delegates to [`Supervisor`] and
//! maps its errors to consistent JSON error responses.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::supervisor::Supervisor;
use crate::tenant::{RunnerStatus, Subscription, TenantConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

/// Builds the management API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/clients", get(list_clients))
        .route("/clients/add", post(add_client))
        .route("/clients/:tenant_id/stop", post(stop_client))
        .route("/clients/:tenant_id/status", get(client_status))
        .route("/subscriptions", get(list_subscriptions))
        .route("/subscriptions/add", post(add_subscription))
        .route("/subscriptions/:subscription_id/remove", post(remove_subscription))
        .route("/subscriptions/:subscription_id/status", get(subscription_status))
        .with_state(state)
}

/// JSON body of every error response: stable `code` plus a human-readable
/// `message`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Structured API error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let (status, code) = match &err {
            BridgeError::DuplicateTenant(_) => (StatusCode::CONFLICT, "duplicate_tenant"),
            BridgeError::TenantNotFound(_) => (StatusCode::NOT_FOUND, "tenant_not_found"),
            BridgeError::SubscriptionNotFound(_) => {
                (StatusCode::NOT_FOUND, "subscription_not_found")
            }
            BridgeError::BrokerRejected(_) => (StatusCode::BAD_GATEWAY, "broker_rejected"),
            BridgeError::RunnerUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "runner_unavailable")
            }
            BridgeError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            other => {
                // Internal details are logged server-side; clients get a
                // generic message.
                tracing::error!(error = %other, "internal error in management API");
                return ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ErrorBody {
                        code: "internal".to_string(),
                        message: "internal error".to_string(),
                    },
                };
            }
        };
        ApiError {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Request body for removing a subscription.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveSubscriptionRequest {
    pub tenant_id: i64,
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "MQTT webhook bridge" }))
}

/// Lists all registered tenant configurations, secrets redacted.
async fn list_clients(State(state): State<AppState>) -> Json<Vec<TenantConfig>> {
    Json(state.supervisor.list().await)
}

/// Registers a tenant and starts its client runner.
async fn add_client(
    State(state): State<AppState>,
    Json(config): Json<TenantConfig>,
) -> Result<Json<RunnerStatus>, ApiError> {
    let status = state.supervisor.add(config).await?;
    Ok(Json(status))
}

/// Stops a tenant's client runner.
async fn stop_client(
    Path(tenant_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<RunnerStatus>, ApiError> {
    let status = state.supervisor.stop(tenant_id).await?;
    Ok(Json(status))
}

/// Reports a tenant runner's lifecycle status.
async fn client_status(
    Path(tenant_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<RunnerStatus>, ApiError> {
    let status = state.supervisor.status(tenant_id).await?;
    Ok(Json(status))
}

/// Lists subscriptions across all tenants.
async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<Subscription>> {
    Json(state.supervisor.list_subscriptions().await)
}

/// Adds a subscription to its tenant's connection.
async fn add_subscription(
    State(state): State<AppState>,
    Json(subscription): Json<Subscription>,
) -> Result<Json<Subscription>, ApiError> {
    let tenant_id = subscription.tenant_id;
    let subscription = state
        .supervisor
        .add_subscription(tenant_id, subscription)
        .await?;
    Ok(Json(subscription))
}

/// Removes a subscription from its tenant's connection.
async fn remove_subscription(
    Path(subscription_id): Path<i64>,
    State(state): State<AppState>,
    Json(request): Json<RemoveSubscriptionRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .supervisor
        .remove_subscription(request.tenant_id, subscription_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Looks a subscription up by id across all tenants.
async fn subscription_status(
    Path(subscription_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state.supervisor.subscription_status(subscription_id).await?;
    Ok(Json(subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(AppState {
            supervisor: Arc::new(Supervisor::new()),
        })
    }

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
    async fn test_root_greets() {
        let response = app().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["message"], "MQTT webhook bridge");
    }

    #[tokio::test]
    async fn test_clients_list_empty() {
        let response = app().oneshot(get_request("/clients")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_status_of_unknown_tenant_is_404() {
        let response = app()
            .oneshot(get_request("/clients/42/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["code"], "tenant_not_found");
    }

    #[tokio::test]
    async fn test_stop_of_unknown_tenant_is_404() {
        let response = app()
            .oneshot(json_request("POST", "/clients/42/stop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_add_client_with_bad_url_is_400() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/clients/add",
                serde_json::json!({
                    "tenant_id": 1,
                    "backend_url": "backend.local",
                    "backend_token": "t",
                    "mqtt_host": "127.0.0.1"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_add_subscription_unknown_tenant_is_404() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/subscriptions/add",
                serde_json::json!({ "id": 1, "tenant_id": 5, "topic": "a/b" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["code"], "tenant_not_found");
    }

    #[tokio::test]
    async fn test_remove_subscription_unknown_tenant_is_404() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/subscriptions/3/remove",
                serde_json::json!({ "tenant_id": 5 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_subscription_status_unknown_is_404() {
        let response = app()
            .oneshot(get_request("/subscriptions/3/status"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["code"], "subscription_not_found");
    }

    #[tokio::test]
    async fn test_subscriptions_list_empty() {
        let response = app().oneshot(get_request("/subscriptions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, serde_json::json!([]));
    }
}
