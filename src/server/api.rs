//! REST API handlers for the registry
//!
//! Handlers only validate input and map store results onto status codes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metrics;
use crate::registry::{ErrorResponse, InstanceRecord, RegistryError};

use super::AppState;

/// Name reported by the registry's own liveness endpoint
pub const REGISTRY_SERVICE_NAME: &str = "registry-service";

// ============================================================================
// Request / Response Types
// ============================================================================

/// Request to register an instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Response to a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub instance_id: String,
}

/// Request to unregister one instance (with `url`) or a whole service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Plain acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Registry liveness response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Full registry snapshot, keyed by service name
pub type ServicesResponse = BTreeMap<String, Vec<InstanceRecord>>;

/// Treat absent and blank strings alike
fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn rejection_to_error(rejection: JsonRejection) -> RegistryError {
    RegistryError::validation(format!("Invalid request body: {}", rejection.body_text()))
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/unregister", delete(unregister))
        .route("/services", get(list_services))
        .route("/services/{name}", get(select_instance))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ============================================================================
// Registration Handlers
// ============================================================================

/// Register an instance, or refresh it if the URL is already known
async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, RegistryError> {
    let Json(request) = payload.map_err(rejection_to_error)?;

    let (Some(name), Some(url)) = (required(request.name), required(request.url)) else {
        return Err(RegistryError::validation("Missing name or url"));
    };
    let instance_id = required(request.instance_id);

    let registration = state.store.upsert(&name, &url, instance_id).await;
    metrics::record_registration(&name, registration.created);
    metrics::update_store_metrics(&state.store.stats().await);

    let message = if registration.created {
        format!("{name} registered")
    } else {
        format!("{name} instance updated")
    };

    Ok(Json(RegisterResponse {
        message,
        instance_id: registration.instance_id,
    }))
}

/// Unregister one instance or a whole service
async fn unregister(
    State(state): State<AppState>,
    payload: Result<Json<UnregisterRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, RegistryError> {
    let Json(request) = payload.map_err(rejection_to_error)?;

    let Some(name) = required(request.name) else {
        return Err(RegistryError::validation("Missing name"));
    };

    let message = match required(request.url) {
        Some(url) => {
            if !state.store.remove_instance(&name, &url).await {
                return Err(RegistryError::not_found(&name));
            }
            format!("{name} instance unregistered")
        }
        None => {
            if !state.store.remove_all(&name).await {
                return Err(RegistryError::not_found(&name));
            }
            format!("{name} unregistered")
        }
    };

    metrics::update_store_metrics(&state.store.stats().await);

    Ok(Json(MessageResponse { message }))
}

// ============================================================================
// Lookup Handlers
// ============================================================================

/// Snapshot of every registered service
async fn list_services(State(state): State<AppState>) -> Json<ServicesResponse> {
    Json(state.store.list_all().await)
}

/// Pick one healthy instance of a service (round-robin)
async fn select_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<InstanceRecord>, RegistryError> {
    let result = state.store.select(&name).await;

    let outcome = match &result {
        Ok(_) => "selected",
        Err(RegistryError::NoHealthyInstances { .. }) => "no_healthy",
        Err(_) => "not_found",
    };
    metrics::record_selection(&name, outcome);

    if let Err(e) = &result {
        tracing::debug!(service = %name, error = %e, "Selection failed");
    }

    result.map(Json)
}

// ============================================================================
// Operational Handlers
// ============================================================================

/// Registry liveness endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: REGISTRY_SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus metrics in text format
async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::registry::InstanceStore;

    fn test_state() -> AppState {
        AppState::new(Arc::new(InstanceStore::new()))
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_register_and_select() {
        let router = create_router(test_state());

        let (status, body) = send(
            &router,
            Method::POST,
            "/register",
            Some(json!({"name": "ingestion-service", "url": "http://a:5001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "ingestion-service registered");
        assert_eq!(body["instance_id"], "ingestion-service-0");

        let (status, body) = send(&router, Method::GET, "/services/ingestion-service", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["url"], "http://a:5001");
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_reregister_reports_update() {
        let router = create_router(test_state());
        let request = json!({"name": "ingestion-service", "url": "http://a:5001", "instance_id": "primary"});

        let (_, first) = send(&router, Method::POST, "/register", Some(request.clone())).await;
        let (status, second) = send(&router, Method::POST, "/register", Some(request)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["message"], "ingestion-service instance updated");
        assert_eq!(first["instance_id"], second["instance_id"]);
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let router = create_router(test_state());

        let (status, body) = send(&router, Method::POST, "/register", Some(json!({"name": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing name or url");

        let (status, _) = send(&router, Method::POST, "/register", Some(json!({"name": "", "url": "http://a"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, Method::POST, "/register", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_select_unknown_service() {
        let router = create_router(test_state());
        let (status, body) = send(&router, Method::GET, "/services/missing", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Service not found: missing");
    }

    #[tokio::test]
    async fn test_select_no_healthy_instances() {
        let state = test_state();
        state.store.upsert("storage-service", "http://s:5002", None).await;
        state.store.set_health("storage-service", "http://s:5002", false).await;
        let router = create_router(state);

        let (status, _) = send(&router, Method::GET, "/services/storage-service", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unregister() {
        let state = test_state();
        state.store.upsert("ingestion-service", "http://a:5001", None).await;
        state.store.upsert("ingestion-service", "http://b:5001", None).await;
        state.store.upsert("storage-service", "http://s:5002", None).await;
        let router = create_router(state.clone());

        let (status, body) = send(
            &router,
            Method::DELETE,
            "/unregister",
            Some(json!({"name": "ingestion-service", "url": "http://a:5001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "ingestion-service instance unregistered");

        let (status, body) = send(&router, Method::DELETE, "/unregister", Some(json!({"name": "storage-service"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "storage-service unregistered");

        let (status, _) = send(&router, Method::DELETE, "/unregister", Some(json!({"name": "storage-service"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&router, Method::DELETE, "/unregister", Some(json!({"url": "http://b:5001"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let services = state.store.list_all().await;
        assert_eq!(services.len(), 1);
        assert_eq!(services["ingestion-service"].len(), 1);
    }

    #[tokio::test]
    async fn test_list_services() {
        let state = test_state();
        state.store.upsert("ingestion-service", "http://a:5001", None).await;
        state.store.upsert("analytics-service", "http://n:5003", None).await;
        let router = create_router(state);

        let (status, body) = send(&router, Method::GET, "/services", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ingestion-service"][0]["url"], "http://a:5001");
        assert_eq!(body["analytics-service"][0]["instance_id"], "analytics-service-0");
    }

    #[tokio::test]
    async fn test_health_check() {
        let router = create_router(test_state());
        let (status, body) = send(&router, Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], REGISTRY_SERVICE_NAME);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let _ = metrics::init_metrics();
        let router = create_router(test_state());

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_required_filters_blank() {
        assert_eq!(required(None), None);
        assert_eq!(required(Some("  ".to_string())), None);
        assert_eq!(required(Some("x".to_string())), Some("x".to_string()));
    }
}
