use crate::{
    allocation::ConsolidatedMaterial,
    entities::material_batch,
    errors::ServiceError,
    services::batches::CreateBatchInput,
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBatchRequest {
    /// Optional explicit reference; generated when omitted
    pub batch_ref: Option<String>,
    pub group_id: Uuid,
    pub material_id: Uuid,
    #[validate(length(min = 1, message = "Material name cannot be empty"))]
    pub material_name: String,
    pub brand: Option<String>,
    #[validate(length(min = 1, message = "Unit cannot be empty"))]
    pub unit: String,
    pub paying_site_id: Uuid,
    pub purchase_date: NaiveDate,
    #[schema(value_type = String)]
    pub quantity: Decimal,
    #[schema(value_type = String)]
    pub unit_cost: Decimal,
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchSummary {
    pub id: Uuid,
    pub batch_ref: String,
    pub group_id: Uuid,
    pub material_id: Uuid,
    pub material_name: String,
    pub brand: Option<String>,
    pub unit: String,
    pub paying_site_id: Uuid,
    pub purchase_date: NaiveDate,
    #[schema(value_type = String)]
    pub original_qty: Decimal,
    #[schema(value_type = String)]
    pub used_qty: Decimal,
    #[schema(value_type = String)]
    pub remaining_qty: Decimal,
    #[schema(value_type = String)]
    pub unit_cost: Decimal,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<material_batch::Model> for BatchSummary {
    fn from(model: material_batch::Model) -> Self {
        Self {
            id: model.id,
            batch_ref: model.batch_ref,
            group_id: model.group_id,
            material_id: model.material_id,
            material_name: model.material_name,
            brand: model.brand,
            unit: model.unit,
            paying_site_id: model.paying_site_id,
            purchase_date: model.purchase_date,
            original_qty: model.original_qty,
            used_qty: model.used_qty,
            remaining_qty: model.remaining_qty,
            unit_cost: model.unit_cost,
            total_amount: model.total_amount,
            status: model.status,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct BatchListQuery {
    pub group_id: Uuid,
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenBatchQuery {
    pub group_id: Uuid,
    pub material_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RemainingResponse {
    pub batch_ref: String,
    #[schema(value_type = String)]
    pub remaining_qty: Decimal,
}

pub async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<CreateBatchRequest>,
) -> ApiResult<BatchSummary> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let batch = state
        .batch_service()
        .create_batch(CreateBatchInput {
            batch_ref: payload.batch_ref,
            group_id: payload.group_id,
            material_id: payload.material_id,
            material_name: payload.material_name,
            brand: payload.brand,
            unit: payload.unit,
            paying_site_id: payload.paying_site_id,
            purchase_date: payload.purchase_date,
            quantity: payload.quantity,
            unit_cost: payload.unit_cost,
            created_by: payload.created_by,
        })
        .await?;

    Ok(Json(ApiResponse::success(BatchSummary::from(batch))))
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(query): Query<BatchListQuery>,
) -> ApiResult<PaginatedResponse<BatchSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (batches, total) = state
        .batch_service()
        .list_batches(query.group_id, page, limit)
        .await?;

    let items: Vec<BatchSummary> = batches.into_iter().map(BatchSummary::from).collect();
    let total_pages = (total + limit - 1) / limit;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

/// Open batches of a group in FIFO consumption order.
pub async fn list_open_batches(
    State(state): State<AppState>,
    Query(query): Query<OpenBatchQuery>,
) -> ApiResult<Vec<BatchSummary>> {
    let batches = state
        .batch_service()
        .list_open_batches(query.group_id, query.material_id)
        .await?;
    let items: Vec<BatchSummary> = batches.into_iter().map(BatchSummary::from).collect();
    Ok(Json(ApiResponse::success(items)))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_ref): Path<String>,
) -> ApiResult<BatchSummary> {
    let batch = state.batch_service().get_batch(&batch_ref).await?;
    Ok(Json(ApiResponse::success(BatchSummary::from(batch))))
}

pub async fn get_remaining(
    State(state): State<AppState>,
    Path(batch_ref): Path<String>,
) -> ApiResult<RemainingResponse> {
    let remaining_qty = state.batch_service().get_remaining(&batch_ref).await?;
    Ok(Json(ApiResponse::success(RemainingResponse {
        batch_ref,
        remaining_qty,
    })))
}

/// Converts a never-shared batch into a plain own-site purchase.
pub async fn convert_batch(
    State(state): State<AppState>,
    Path(batch_ref): Path<String>,
) -> ApiResult<BatchSummary> {
    let batch = state
        .batch_service()
        .convert_to_own_purchase(&batch_ref)
        .await?;
    Ok(Json(ApiResponse::success(BatchSummary::from(batch))))
}

/// Per-material stock aggregation over a group's open batches.
pub async fn consolidated_view(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Vec<ConsolidatedMaterial>> {
    let view = state.batch_service().consolidated_view(group_id).await?;
    Ok(Json(ApiResponse::success(view)))
}
