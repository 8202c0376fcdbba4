pub mod allocation;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

pub use handlers::AppServices;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

impl AppState {
    pub fn batch_service(&self) -> Arc<services::batches::BatchService> {
        self.services.batches.clone()
    }

    pub fn usage_service(&self) -> Arc<services::usage::UsageService> {
        self.services.usage.clone()
    }

    pub fn settlement_service(&self) -> Arc<services::settlements::SettlementService> {
        self.services.settlements.clone()
    }

    pub fn consolidated_cache(&self) -> Arc<cache::ConsolidatedCache> {
        self.services.consolidated_cache.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

// API v1 routes
pub fn api_v1_routes() -> Router<AppState> {
    let batches = Router::new()
        .route(
            "/batches",
            post(handlers::batches::create_batch).get(handlers::batches::list_batches),
        )
        .route("/batches/open", get(handlers::batches::list_open_batches))
        .route("/batches/:batch_ref", get(handlers::batches::get_batch))
        .route(
            "/batches/:batch_ref/remaining",
            get(handlers::batches::get_remaining),
        )
        .route(
            "/batches/:batch_ref/convert",
            post(handlers::batches::convert_batch),
        )
        .route(
            "/groups/:group_id/consolidated",
            get(handlers::batches::consolidated_view),
        );

    let usage = Router::new()
        .route("/usage/preview", post(handlers::usage::preview_usage))
        .route(
            "/usage",
            post(handlers::usage::record_usage).get(handlers::usage::list_usage),
        )
        .route(
            "/usage/:id",
            get(handlers::usage::get_usage).delete(handlers::usage::delete_usage),
        );

    let settlements = Router::new()
        .route(
            "/settlements/balances",
            get(handlers::settlements::list_balances),
        )
        .route(
            "/settlements/balances/summary",
            get(handlers::settlements::summarize_balance),
        )
        .route(
            "/settlements",
            post(handlers::settlements::process_settlement)
                .get(handlers::settlements::list_settlements),
        )
        .route(
            "/settlements/:id",
            get(handlers::settlements::get_settlement)
                .delete(handlers::settlements::delete_settlement),
        )
        .route(
            "/settlements/:id/cancel",
            post(handlers::settlements::cancel_settlement),
        );

    Router::new()
        .merge(batches)
        .merge(usage)
        .merge(settlements)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!meta.timestamp.is_empty());
    }

    #[tokio::test]
    async fn validation_errors_response_includes_metadata() {
        let response = crate::tracing::scope_request_id(
            crate::tracing::RequestId::new("meta-validation"),
            async { ApiResponse::<()>::validation_errors(vec!["missing".into()]) },
        )
        .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-validation"));
        assert!(response.errors.is_some());
    }
}
