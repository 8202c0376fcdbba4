use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SiteLedger API",
        version = "0.1.0",
        description = r#"
# SiteLedger Material Settlement API

Tracks group-purchased material batches across construction sites, allocates
usage FIFO from the oldest open stock, and settles inter-site balances with
auditable payment records.

## Core flow

1. A paying site registers a purchase batch for its site group.
2. Any site in the group records usage; stock is drawn FIFO from open
   batches and priced at each batch's unit cost.
3. Cross-site usage accumulates as a pending balance the consuming site
   owes the paying site; self-use is expensed immediately.
4. The debtor settles a balance (optionally at a bargained amount),
   producing a settlement code and an expense entry on its own ledger.

## Error handling

Failing endpoints return a consistent error envelope:

```json
{
  "error": "Unprocessable Entity",
  "message": "Insufficient stock: requested 50, available 42",
  "request_id": "8f14e45f",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (1-indexed) and `limit` (default 20, max 100).
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080/api/v1", description = "Local development")
    ),
    tags(
        (name = "Batches", description = "Group-purchase batch ledger"),
        (name = "Usage", description = "FIFO allocation preview and usage recording"),
        (name = "Settlements", description = "Inter-site balances and settlement processing"),
        (name = "Health", description = "Health check endpoints")
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::PaginatedResponse<serde_json::Value>,

            // Batch types
            crate::handlers::batches::CreateBatchRequest,
            crate::handlers::batches::BatchSummary,
            crate::handlers::batches::RemainingResponse,
            crate::allocation::ConsolidatedMaterial,

            // Usage types
            crate::handlers::usage::PreviewUsageRequest,
            crate::handlers::usage::RecordUsageRequest,
            crate::handlers::usage::UsageAllocationRequest,
            crate::handlers::usage::UsageRecordSummary,
            crate::handlers::usage::UsageCommitResponse,
            crate::handlers::usage::DeleteUsageResponse,
            crate::allocation::AllocationPlan,
            crate::allocation::AllocationLine,

            // Settlement types
            crate::handlers::settlements::ProcessSettlementRequest,
            crate::handlers::settlements::SettlementSummary,
            crate::handlers::settlements::SettlementOutcomeResponse,
            crate::handlers::settlements::CancelSettlementRequest,
            crate::handlers::settlements::CancelSettlementResponse,
            crate::handlers::settlements::BalanceEntryResponse,
            crate::handlers::settlements::BalanceSummaryResponse,
            crate::services::settlements::SettlementScope,
            crate::entities::settlement::PaymentMode,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_generates() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("SiteLedger API"));
        assert!(json.contains("SettlementScope"));
    }
}
