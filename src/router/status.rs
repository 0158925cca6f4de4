//! Service status routes.

use axum::Json;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::{Value, json};

use crate::AppState;
use crate::database::HealthStatus;

/// Handler reporting process and storage health.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = state.lifecycle.health_check().await;
    let timestamp = Utc::now().to_rfc3339();

    if database.status == HealthStatus::Healthy {
        (
            StatusCode::OK,
            Json(json!({
                "status": "OK",
                "timestamp": timestamp,
                "environment": state.config.environment.as_str(),
                "version": state.config.version(),
                "database": database,
            })),
        )
    } else {
        tracing::warn!(detail = %database.detail, state = database.state.as_str(), "health check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "ERROR",
                "timestamp": timestamp,
                "error": "Service unavailable",
                "database": database,
            })),
        )
    }
}

/// Prometheus exposition, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::from("metrics are disabled")),
    }
}

/// Fallback for unknown routes.
pub async fn not_found(method: Method, uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "status": StatusCode::NOT_FOUND.as_u16(),
            "path": uri.path(),
            "method": method.as_str(),
        })),
    )
}
