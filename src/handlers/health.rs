use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

/// Root banner with service name and version.
pub async fn service_info() -> impl IntoResponse {
    Json(json!({
        "service": "siteledger-api",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/swagger-ui",
    }))
}

/// Basic liveness check.
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "up",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

/// Readiness check: verifies the database connection before accepting traffic.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match crate::db::ping(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "ready": true,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            error!("Database readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "ready": false,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}
