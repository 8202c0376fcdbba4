use crate::{
    entities::settlement::{self, PaymentMode},
    errors::ServiceError,
    handlers::usage::UsageRecordSummary,
    services::settlements::{ProcessSettlementInput, SettlementScope},
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

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementSummary {
    pub id: Uuid,
    pub settlement_code: String,
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    pub batch_ref: Option<String>,
    #[schema(value_type = String)]
    pub calculated_amount: Decimal,
    #[schema(value_type = String)]
    pub settlement_amount: Decimal,
    #[schema(value_type = String)]
    pub savings: Decimal,
    pub payment_mode: String,
    pub payment_date: NaiveDate,
    pub payment_reference: Option<String>,
    pub proof_ref: Option<String>,
    pub status: String,
    pub records_count: i32,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<settlement::Model> for SettlementSummary {
    fn from(model: settlement::Model) -> Self {
        let savings = model.savings();
        Self {
            id: model.id,
            settlement_code: model.settlement_code,
            debtor_site_id: model.debtor_site_id,
            creditor_site_id: model.creditor_site_id,
            batch_ref: model.batch_ref,
            calculated_amount: model.calculated_amount,
            settlement_amount: model.settlement_amount,
            savings,
            payment_mode: model.payment_mode,
            payment_date: model.payment_date,
            payment_reference: model.payment_reference,
            proof_ref: model.proof_ref,
            status: model.status,
            records_count: model.records_count,
            cancel_reason: model.cancel_reason,
            cancelled_at: model.cancelled_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessSettlementRequest {
    pub debtor_site_id: Uuid,
    pub scope: SettlementScope,
    /// Bargained final amount; defaults to the recomputed balance
    #[schema(value_type = Option<String>)]
    pub settlement_amount: Option<Decimal>,
    pub payment_mode: Option<PaymentMode>,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub proof_ref: Option<String>,
    pub created_by: Option<String>,
}

/// Confirmation payload listing the side effects of a settlement.
#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementOutcomeResponse {
    pub settlement: SettlementSummary,
    pub records_settled: u64,
    pub expense_id: Uuid,
    pub completed_batches: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelSettlementRequest {
    /// UI stage the cancellation came from: "pending" or "completed"
    pub stage: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelSettlementResponse {
    pub settlement: SettlementSummary,
    pub records_reverted: u64,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct BalancesQuery {
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BalanceSummaryQuery {
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    pub batch_ref: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceEntryResponse {
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    #[schema(value_type = String)]
    pub total_quantity: Decimal,
    pub records_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceSummaryResponse {
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    pub batch_ref: Option<String>,
    #[schema(value_type = String)]
    pub calculated_amount: Decimal,
    #[schema(value_type = String)]
    pub total_quantity: Decimal,
    pub unit: Option<String>,
    pub records: Vec<UsageRecordSummary>,
}

#[derive(Debug, Deserialize, Default, ToSchema)]
pub struct SettlementListQuery {
    /// Page number (1-indexed)
    pub page: Option<u64>,
    /// Page size (max 100)
    pub limit: Option<u64>,
}

/// All outstanding debtor/creditor balances derived from pending usage.
pub async fn list_balances(
    State(state): State<AppState>,
    Query(query): Query<BalancesQuery>,
) -> ApiResult<Vec<BalanceEntryResponse>> {
    let balances = state
        .settlement_service()
        .list_balances(query.group_id)
        .await?;
    let items = balances
        .into_iter()
        .map(|b| BalanceEntryResponse {
            debtor_site_id: b.debtor_site_id,
            creditor_site_id: b.creditor_site_id,
            total_amount: b.total_amount,
            total_quantity: b.total_quantity,
            records_count: b.records_count,
        })
        .collect();
    Ok(Json(ApiResponse::success(items)))
}

/// Pre-settlement summary of what one site owes another.
pub async fn summarize_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceSummaryQuery>,
) -> ApiResult<BalanceSummaryResponse> {
    let summary = state
        .settlement_service()
        .summarize_balance(
            query.debtor_site_id,
            query.creditor_site_id,
            query.batch_ref,
        )
        .await?;
    Ok(Json(ApiResponse::success(BalanceSummaryResponse {
        debtor_site_id: summary.debtor_site_id,
        creditor_site_id: summary.creditor_site_id,
        batch_ref: summary.batch_ref,
        calculated_amount: summary.calculated_amount,
        total_quantity: summary.total_quantity,
        unit: summary.unit,
        records: summary
            .records
            .into_iter()
            .map(UsageRecordSummary::from)
            .collect(),
    })))
}

pub async fn process_settlement(
    State(state): State<AppState>,
    Json(payload): Json<ProcessSettlementRequest>,
) -> ApiResult<SettlementOutcomeResponse> {
    let outcome = state
        .settlement_service()
        .process_settlement(ProcessSettlementInput {
            debtor_site_id: payload.debtor_site_id,
            scope: payload.scope,
            settlement_amount: payload.settlement_amount,
            payment_mode: payload.payment_mode,
            payment_date: payload.payment_date,
            payment_reference: payload.payment_reference,
            proof_ref: payload.proof_ref,
            created_by: payload.created_by,
        })
        .await?;

    state.consolidated_cache().invalidate(outcome.group_id);

    Ok(Json(ApiResponse::success(SettlementOutcomeResponse {
        records_settled: outcome.records_settled,
        expense_id: outcome.expense.id,
        completed_batches: outcome.completed_batches,
        settlement: SettlementSummary::from(outcome.settlement),
    })))
}

pub async fn cancel_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelSettlementRequest>,
) -> ApiResult<CancelSettlementResponse> {
    if let Some(stage) = payload.stage.as_deref() {
        if stage != "pending" && stage != "completed" {
            return Err(ServiceError::ValidationError(format!(
                "unknown cancellation stage: {}",
                stage
            )));
        }
    }

    let outcome = state
        .settlement_service()
        .cancel_settlement(id, payload.reason)
        .await?;

    if let Some(group_id) = outcome.group_id {
        state.consolidated_cache().invalidate(group_id);
    }

    Ok(Json(ApiResponse::success(CancelSettlementResponse {
        records_reverted: outcome.records_reverted,
        settlement: SettlementSummary::from(outcome.settlement),
    })))
}

/// Permanently removes a cancelled settlement.
pub async fn delete_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SettlementSummary> {
    let deleted = state.settlement_service().delete_settlement(id).await?;
    Ok(Json(ApiResponse::success(SettlementSummary::from(deleted))))
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SettlementSummary> {
    let settlement = state.settlement_service().get_settlement(id).await?;
    Ok(Json(ApiResponse::success(SettlementSummary::from(
        settlement,
    ))))
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(query): Query<SettlementListQuery>,
) -> ApiResult<PaginatedResponse<SettlementSummary>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (settlements, total) = state
        .settlement_service()
        .list_settlements(page, limit)
        .await?;

    let items: Vec<SettlementSummary> = settlements
        .into_iter()
        .map(SettlementSummary::from)
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
