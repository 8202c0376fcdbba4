use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Site-level ledger entry for money owed/paid for materials.
/// Created for self-use at usage time and on the debtor side of a settlement.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "material_expenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub site_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub amount: rust_decimal::Decimal,
    pub description: String,
    pub batch_ref: Option<String>,
    pub settlement_code: Option<String>,
    /// Set when the expense was generated by a self-use usage record.
    pub usage_record_id: Option<Uuid>,
    pub payment_mode: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub proof_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
