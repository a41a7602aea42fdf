//! Health and monitoring endpoints

use crate::error::BridgeError;
use crate::service::AppState;
use crate::{SERVICE_NAME, VERSION};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");

    let backend = state.store.backend();
    let (status_code, status, store_error) = match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "healthy", None),
        Err(e) => {
            warn!(backend = backend, error = %e, "Store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", Some(e.to_string()))
        }
    };

    (
        status_code,
        Json(json!({
            "service": SERVICE_NAME,
            "version": VERSION,
            "status": status,
            "store": {
                "backend": backend,
                "healthy": store_error.is_none(),
                "error": store_error,
            },
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "timestamp": Utc::now(),
        })),
    )
}

/// Liveness check endpoint (for Kubernetes)
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "alive"})))
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.config.observability.metrics_enabled {
        return BridgeError::not_found("Metrics").into_response();
    }

    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
