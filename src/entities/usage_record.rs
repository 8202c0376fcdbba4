use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "usage_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub batch_id: Uuid,
    pub batch_ref: String,
    pub group_id: Uuid,
    pub material_id: Uuid,
    pub usage_site_id: Uuid,
    pub paying_site_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_cost: rust_decimal::Decimal,
    pub usage_date: NaiveDate,
    pub work_description: Option<String>,
    pub settlement_status: String,
    pub settlement_code: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material_batch::Entity",
        from = "Column::BatchId",
        to = "super::material_batch::Column::Id"
    )]
    MaterialBatch,
}

impl Related<super::material_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaterialBatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Settlement state of one consumption event.
/// `SelfUse` rows never enter an inter-site balance; they are expensed
/// against the paying site at record time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    Pending,
    Settled,
    SelfUse,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Settled => "SETTLED",
            SettlementStatus::SelfUse => "SELF_USE",
        }
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
