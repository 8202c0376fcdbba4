use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "settlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub settlement_code: String,
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    /// Present when the settlement was scoped to a single batch.
    pub batch_ref: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub calculated_amount: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub settlement_amount: rust_decimal::Decimal,
    pub payment_mode: String,
    pub payment_date: NaiveDate,
    pub payment_reference: Option<String>,
    pub proof_ref: Option<String>,
    pub status: String,
    pub records_count: i32,
    pub created_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Difference between the recomputed balance and the amount actually paid.
    /// Negative when the bargained amount exceeded the calculated one.
    pub fn savings(&self) -> rust_decimal::Decimal {
        self.calculated_amount - self.settlement_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Upi,
    BankTransfer,
    Adjustment,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "CASH",
            PaymentMode::Upi => "UPI",
            PaymentMode::BankTransfer => "BANK_TRANSFER",
            PaymentMode::Adjustment => "ADJUSTMENT",
        }
    }

    /// UPI and bank transfers must carry a proof reference.
    pub fn requires_proof(&self) -> bool {
        matches!(self, PaymentMode::Upi | PaymentMode::BankTransfer)
    }
}

impl std::fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementState {
    Pending,
    Settled,
    Cancelled,
}

impl SettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Pending => "PENDING",
            SettlementState::Settled => "SETTLED",
            SettlementState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
