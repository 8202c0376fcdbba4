use crate::{
    allocation::AllocationPlan,
    entities::usage_record,
    errors::ServiceError,
    services::usage::{RecordUsageInput, UsageAllocation, UsageFilter},
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

#[derive(Debug, Deserialize, ToSchema)]
pub struct PreviewUsageRequest {
    pub group_id: Uuid,
    pub material_id: Uuid,
    #[schema(value_type = String)]
    pub quantity: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageAllocationRequest {
    pub batch_ref: String,
    #[schema(value_type = String)]
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RecordUsageRequest {
    pub usage_site_id: Uuid,
    pub usage_date: NaiveDate,
    #[validate(length(min = 1, message = "At least one allocation line is required"))]
    pub allocations: Vec<UsageAllocationRequest>,
    pub work_description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UsageRecordSummary {
    pub id: Uuid,
    pub batch_ref: String,
    pub group_id: Uuid,
    pub material_id: Uuid,
    pub usage_site_id: Uuid,
    pub paying_site_id: Uuid,
    #[schema(value_type = String)]
    pub quantity: Decimal,
    #[schema(value_type = String)]
    pub unit_cost: Decimal,
    #[schema(value_type = String)]
    pub total_cost: Decimal,
    pub usage_date: NaiveDate,
    pub work_description: Option<String>,
    pub settlement_status: String,
    pub settlement_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<usage_record::Model> for UsageRecordSummary {
    fn from(model: usage_record::Model) -> Self {
        Self {
            id: model.id,
            batch_ref: model.batch_ref,
            group_id: model.group_id,
            material_id: model.material_id,
            usage_site_id: model.usage_site_id,
            paying_site_id: model.paying_site_id,
            quantity: model.quantity,
            unit_cost: model.unit_cost,
            total_cost: model.total_cost,
            usage_date: model.usage_date,
            work_description: model.work_description,
            settlement_status: model.settlement_status,
            settlement_code: model.settlement_code,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UsageCommitResponse {
    pub records: Vec<UsageRecordSummary>,
    #[schema(value_type = String)]
    pub total_quantity: Decimal,
    #[schema(value_type = String)]
    pub total_cost: Decimal,
    pub completed_batches: Vec<String>,
    pub expenses_created: usize,
    pub cross_site: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteUsageResponse {
    pub usage_id: Uuid,
    pub batch_ref: String,
    #[schema(value_type = String)]
    pub restored_qty: Decimal,
    pub batch_reopened: bool,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct UsageListQuery {
    pub usage_site_id: Option<Uuid>,
    pub batch_ref: Option<String>,
    /// PENDING, SETTLED, or SELF_USE
    pub settlement_status: Option<String>,
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
}

/// Dry-run FIFO allocation: shows which batches a usage request would
/// draw from, without committing anything.
pub async fn preview_usage(
    State(state): State<AppState>,
    Json(payload): Json<PreviewUsageRequest>,
) -> ApiResult<AllocationPlan> {
    let plan = state
        .usage_service()
        .preview_usage(payload.group_id, payload.material_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(plan)))
}

pub async fn record_usage(
    State(state): State<AppState>,
    Json(payload): Json<RecordUsageRequest>,
) -> ApiResult<UsageCommitResponse> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let commit = state
        .usage_service()
        .record_usage(RecordUsageInput {
            usage_site_id: payload.usage_site_id,
            usage_date: payload.usage_date,
            allocations: payload
                .allocations
                .into_iter()
                .map(|line| UsageAllocation {
                    batch_ref: line.batch_ref,
                    quantity: line.quantity,
                })
                .collect(),
            work_description: payload.work_description,
            created_by: payload.created_by,
        })
        .await?;

    state.consolidated_cache().invalidate(commit.group_id);

    Ok(Json(ApiResponse::success(UsageCommitResponse {
        total_quantity: commit.total_quantity,
        total_cost: commit.total_cost,
        completed_batches: commit.completed_batches,
        expenses_created: commit.expenses.len(),
        cross_site: commit.cross_site,
        records: commit
            .records
            .into_iter()
            .map(UsageRecordSummary::from)
            .collect(),
    })))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<UsageRecordSummary> {
    let record = state.usage_service().get_usage(id).await?;
    Ok(Json(ApiResponse::success(UsageRecordSummary::from(record))))
}

pub async fn list_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageListQuery>,
) -> ApiResult<PaginatedResponse<UsageRecordSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (records, total) = state
        .usage_service()
        .list_usage(
            UsageFilter {
                usage_site_id: query.usage_site_id,
                batch_ref: query.batch_ref,
                settlement_status: query.settlement_status.map(|s| s.to_uppercase()),
            },
            page,
            limit,
        )
        .await?;

    let items: Vec<UsageRecordSummary> = records
        .into_iter()
        .map(UsageRecordSummary::from)
        .collect();
    let total_pages = (total + limit - 1) / limit;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

/// Deletes an unsettled usage record and restores its batch quantity.
pub async fn delete_usage(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<DeleteUsageResponse> {
    let outcome = state.usage_service().delete_usage(id).await?;
    state.consolidated_cache().invalidate(outcome.group_id);

    Ok(Json(ApiResponse::success(DeleteUsageResponse {
        usage_id: outcome.usage_id,
        batch_ref: outcome.batch_ref,
        restored_qty: outcome.quantity,
        batch_reopened: outcome.reopened,
    })))
}
