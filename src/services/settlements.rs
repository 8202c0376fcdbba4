//! Settlement processor: converts pending cross-site usage records into
//! settlement transactions with payment details and bargained amounts.

use crate::allocation::QTY_EPSILON;
use crate::entities::material_batch::{self, BatchStatus, Entity as MaterialBatch};
use crate::entities::material_expense;
use crate::entities::settlement::{self, Entity as Settlement, PaymentMode, SettlementState};
use crate::entities::usage_record::{self, Entity as UsageRecord, SettlementStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::batches::unwrap_transaction_error;
use chrono::{NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// What a settlement covers: a single batch's pending records, or the
/// pending balance the debtor owes one creditor, optionally bounded to a
/// usage-date window for period-wise settling.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettlementScope {
    ByBatch {
        batch_ref: String,
    },
    ByBalance {
        creditor_site_id: Uuid,
        #[serde(default)]
        period_start: Option<NaiveDate>,
        #[serde(default)]
        period_end: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSettlementInput {
    pub debtor_site_id: Uuid,
    pub scope: SettlementScope,
    /// Bargained final amount. Defaults to the recomputed balance.
    pub settlement_amount: Option<Decimal>,
    pub payment_mode: Option<PaymentMode>,
    pub payment_date: Option<NaiveDate>,
    pub payment_reference: Option<String>,
    pub proof_ref: Option<String>,
    pub created_by: Option<String>,
}

/// Side effects performed by a committed settlement, for confirmation display.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub settlement: settlement::Model,
    pub expense: material_expense::Model,
    pub records_settled: u64,
    pub completed_batches: Vec<String>,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    pub batch_ref: Option<String>,
    pub calculated_amount: Decimal,
    pub total_quantity: Decimal,
    /// Unit of measure when the balance covers a single batch.
    pub unit: Option<String>,
    pub records: Vec<usage_record::Model>,
}

/// One pending debtor/creditor pair in the balances overview.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub debtor_site_id: Uuid,
    pub creditor_site_id: Uuid,
    pub total_amount: Decimal,
    pub total_quantity: Decimal,
    pub records_count: usize,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub settlement: settlement::Model,
    pub records_reverted: u64,
    pub group_id: Option<Uuid>,
}

/// Service for inter-site settlement processing
#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    code_prefix: String,
}

impl SettlementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        code_prefix: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            code_prefix,
        }
    }

    /// Sums the pending usage records a debtor owes a creditor, optionally
    /// scoped to one batch. Read-only; intended for display before settling.
    #[instrument(skip(self))]
    pub async fn summarize_balance(
        &self,
        debtor_site_id: Uuid,
        creditor_site_id: Uuid,
        batch_ref: Option<String>,
    ) -> Result<BalanceSummary, ServiceError> {
        // An unknown batch is NotFound, matching process_settlement, rather
        // than an empty zero summary.
        let unit = match &batch_ref {
            Some(batch_ref) => {
                let batch = MaterialBatch::find()
                    .filter(material_batch::Column::BatchRef.eq(batch_ref.as_str()))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Batch {} not found", batch_ref))
                    })?;
                Some(batch.unit)
            }
            None => None,
        };

        let mut query = pending_records_query(debtor_site_id)
            .filter(usage_record::Column::PayingSiteId.eq(creditor_site_id));
        if let Some(ref batch_ref) = batch_ref {
            query = query.filter(usage_record::Column::BatchRef.eq(batch_ref.as_str()));
        }
        let records = query.all(&*self.db).await?;

        let calculated_amount: Decimal = records.iter().map(|r| r.total_cost).sum();
        let total_quantity: Decimal = records.iter().map(|r| r.quantity).sum();

        Ok(BalanceSummary {
            debtor_site_id,
            creditor_site_id,
            batch_ref,
            calculated_amount,
            total_quantity,
            unit,
            records,
        })
    }

    /// All outstanding debtor/creditor balances, aggregated from pending
    /// usage records, optionally restricted to one site group.
    #[instrument(skip(self))]
    pub async fn list_balances(
        &self,
        group_id: Option<Uuid>,
    ) -> Result<Vec<BalanceEntry>, ServiceError> {
        let mut query = UsageRecord::find()
            .filter(usage_record::Column::SettlementStatus.eq(SettlementStatus::Pending.as_str()))
            .order_by_asc(usage_record::Column::UsageDate);
        if let Some(group_id) = group_id {
            query = query.filter(usage_record::Column::GroupId.eq(group_id));
        }
        let records = query.all(&*self.db).await?;

        let mut balances: Vec<BalanceEntry> = Vec::new();
        for record in &records {
            match balances.iter_mut().find(|b| {
                b.debtor_site_id == record.usage_site_id
                    && b.creditor_site_id == record.paying_site_id
            }) {
                Some(entry) => {
                    entry.total_amount += record.total_cost;
                    entry.total_quantity += record.quantity;
                    entry.records_count += 1;
                }
                None => balances.push(BalanceEntry {
                    debtor_site_id: record.usage_site_id,
                    creditor_site_id: record.paying_site_id,
                    total_amount: record.total_cost,
                    total_quantity: record.quantity,
                    records_count: 1,
                }),
            }
        }
        Ok(balances)
    }

    /// Settles a pending balance in one transaction: recomputes the owed
    /// amount from current pending records, marks them settled under a
    /// freshly generated code, books the (possibly bargained) amount as an
    /// expense on the debtor, and completes any batch that is now fully
    /// consumed and fully settled.
    #[instrument(skip(self, input), fields(debtor_site_id = %input.debtor_site_id))]
    pub async fn process_settlement(
        &self,
        input: ProcessSettlementInput,
    ) -> Result<SettlementOutcome, ServiceError> {
        let payment_mode = input.payment_mode.ok_or(ServiceError::MissingPaymentMode)?;
        let payment_date = input.payment_date.ok_or(ServiceError::MissingPaymentDate)?;
        if payment_mode.requires_proof() && input.proof_ref.is_none() {
            return Err(ServiceError::ProofRequiredForElectronicPayment);
        }
        if let Some(amount) = input.settlement_amount {
            if amount <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "settlement amount must be positive".into(),
                ));
            }
        }

        let code_prefix = self.code_prefix.clone();
        let db = self.db.clone();

        let outcome = db
            .transaction::<_, SettlementOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    // Generated under the same transaction as the insert so
                    // the uniqueness check and the write cannot be split by
                    // a concurrent settlement.
                    let settlement_code =
                        generate_settlement_code(txn, &code_prefix).await?;

                    let mut query = pending_records_query(input.debtor_site_id);
                    let scoped_batch_ref = match &input.scope {
                        SettlementScope::ByBatch { batch_ref } => {
                            // Fail with NotFound rather than NothingToSettle
                            // when the batch itself is unknown.
                            MaterialBatch::find()
                                .filter(material_batch::Column::BatchRef.eq(batch_ref.as_str()))
                                .one(txn)
                                .await?
                                .ok_or_else(|| {
                                    ServiceError::NotFound(format!(
                                        "Batch {} not found",
                                        batch_ref
                                    ))
                                })?;
                            query = query
                                .filter(usage_record::Column::BatchRef.eq(batch_ref.as_str()));
                            Some(batch_ref.clone())
                        }
                        SettlementScope::ByBalance {
                            creditor_site_id,
                            period_start,
                            period_end,
                        } => {
                            query = query.filter(
                                usage_record::Column::PayingSiteId.eq(*creditor_site_id),
                            );
                            if let Some(start) = period_start {
                                query = query
                                    .filter(usage_record::Column::UsageDate.gte(*start));
                            }
                            if let Some(end) = period_end {
                                query =
                                    query.filter(usage_record::Column::UsageDate.lte(*end));
                            }
                            None
                        }
                    };

                    let records = query.all(txn).await?;
                    if records.is_empty() {
                        return Err(ServiceError::NothingToSettle);
                    }
                    let creditor_site_id = records[0].paying_site_id;
                    let group_id = records[0].group_id;

                    let calculated_amount: Decimal =
                        records.iter().map(|r| r.total_cost).sum();
                    let settlement_amount =
                        input.settlement_amount.unwrap_or(calculated_amount);

                    let record_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
                    let scope_label = scoped_batch_ref
                        .clone()
                        .unwrap_or_else(|| "pending balance".to_string());
                    let records_settled = settle_pending_records(
                        txn,
                        &record_ids,
                        &settlement_code,
                        &scope_label,
                    )
                    .await?;

                    let now = Utc::now();
                    let settlement_model = settlement::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        settlement_code: Set(settlement_code.clone()),
                        debtor_site_id: Set(input.debtor_site_id),
                        creditor_site_id: Set(creditor_site_id),
                        batch_ref: Set(scoped_batch_ref.clone()),
                        calculated_amount: Set(calculated_amount),
                        settlement_amount: Set(settlement_amount),
                        payment_mode: Set(payment_mode.as_str().to_string()),
                        payment_date: Set(payment_date),
                        payment_reference: Set(input.payment_reference.clone()),
                        proof_ref: Set(input.proof_ref.clone()),
                        status: Set(SettlementState::Settled.as_str().to_string()),
                        records_count: Set(record_ids.len() as i32),
                        created_by: Set(input.created_by.clone()),
                        cancel_reason: Set(None),
                        cancelled_at: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let expense = material_expense::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        site_id: Set(input.debtor_site_id),
                        amount: Set(settlement_amount),
                        description: Set(format!(
                            "Inter-site material settlement {}",
                            settlement_code
                        )),
                        batch_ref: Set(scoped_batch_ref),
                        settlement_code: Set(Some(settlement_code.clone())),
                        usage_record_id: Set(None),
                        payment_mode: Set(Some(payment_mode.as_str().to_string())),
                        payment_date: Set(Some(payment_date)),
                        payment_reference: Set(input.payment_reference.clone()),
                        proof_ref: Set(input.proof_ref.clone()),
                        created_at: Set(now),
                    }
                    .insert(txn)
                    .await?;

                    let completed_batches =
                        complete_drained_batches(txn, &records).await?;

                    Ok(SettlementOutcome {
                        settlement: settlement_model,
                        expense,
                        records_settled,
                        completed_batches,
                        group_id,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::SettlementProcessed {
                settlement_code: outcome.settlement.settlement_code.clone(),
                debtor_site_id: outcome.settlement.debtor_site_id,
                creditor_site_id: outcome.settlement.creditor_site_id,
                amount: outcome.settlement.settlement_amount,
                savings: outcome.settlement.savings(),
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.event_sender
            .send(Event::ExpenseCreated {
                expense_id: outcome.expense.id,
                site_id: outcome.expense.site_id,
                amount: outcome.expense.amount,
            })
            .await
            .map_err(ServiceError::EventError)?;
        for batch_ref in &outcome.completed_batches {
            self.event_sender
                .send(Event::BatchCompleted {
                    batch_ref: batch_ref.clone(),
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        info!(
            settlement_code = %outcome.settlement.settlement_code,
            amount = %outcome.settlement.settlement_amount,
            savings = %outcome.settlement.savings(),
            records = outcome.records_settled,
            "settlement processed"
        );
        Ok(outcome)
    }

    /// Cancels a settled settlement: reverts its usage records to pending,
    /// deletes the generated expense, and marks the settlement cancelled.
    /// Cancelled settlements are terminal and cannot be mutated again.
    #[instrument(skip(self))]
    pub async fn cancel_settlement(
        &self,
        settlement_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, ServiceError> {
        let db = self.db.clone();
        let outcome = db
            .transaction::<_, CancelOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let existing = Settlement::find_by_id(settlement_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "Settlement {} not found",
                                settlement_id
                            ))
                        })?;

                    if existing.status == SettlementState::Cancelled.as_str() {
                        return Err(ServiceError::InvalidOperation(format!(
                            "Settlement {} is already cancelled",
                            existing.settlement_code
                        )));
                    }

                    let code = existing.settlement_code.clone();
                    let group_id = UsageRecord::find()
                        .filter(usage_record::Column::SettlementCode.eq(code.as_str()))
                        .one(txn)
                        .await?
                        .map(|r| r.group_id);

                    let reverted = UsageRecord::update_many()
                        .col_expr(
                            usage_record::Column::SettlementStatus,
                            Expr::value(SettlementStatus::Pending.as_str()),
                        )
                        .col_expr(
                            usage_record::Column::SettlementCode,
                            Expr::value(Option::<String>::None),
                        )
                        .col_expr(usage_record::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(usage_record::Column::SettlementCode.eq(code.as_str()))
                        .exec(txn)
                        .await?;

                    material_expense::Entity::delete_many()
                        .filter(material_expense::Column::SettlementCode.eq(code.as_str()))
                        .exec(txn)
                        .await?;

                    let mut active: settlement::ActiveModel = existing.into();
                    active.status = Set(SettlementState::Cancelled.as_str().to_string());
                    active.cancel_reason = Set(reason);
                    active.cancelled_at = Set(Some(Utc::now()));
                    active.updated_at = Set(Utc::now());
                    let cancelled = active.update(txn).await?;

                    Ok(CancelOutcome {
                        settlement: cancelled,
                        records_reverted: reverted.rows_affected,
                        group_id,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::SettlementCancelled {
                settlement_code: outcome.settlement.settlement_code.clone(),
                records_reverted: outcome.records_reverted,
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!(
            settlement_code = %outcome.settlement.settlement_code,
            records_reverted = outcome.records_reverted,
            "settlement cancelled"
        );
        Ok(outcome)
    }

    /// Permanently removes a cancelled settlement. Anything else must be
    /// cancelled first so its usage records and expense get reverted.
    #[instrument(skip(self))]
    pub async fn delete_settlement(
        &self,
        settlement_id: Uuid,
    ) -> Result<settlement::Model, ServiceError> {
        let existing = self.get_settlement(settlement_id).await?;
        if existing.status != SettlementState::Cancelled.as_str() {
            return Err(ServiceError::InvalidOperation(format!(
                "Settlement {} is {} and must be cancelled before deletion",
                existing.settlement_code, existing.status
            )));
        }

        Settlement::delete_by_id(settlement_id)
            .exec(&*self.db)
            .await?;
        info!(settlement_code = %existing.settlement_code, "settlement deleted");
        Ok(existing)
    }

    /// Gets a settlement by id.
    #[instrument(skip(self))]
    pub async fn get_settlement(
        &self,
        settlement_id: Uuid,
    ) -> Result<settlement::Model, ServiceError> {
        Settlement::find_by_id(settlement_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Settlement {} not found", settlement_id))
            })
    }

    /// Lists settlements with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_settlements(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<settlement::Model>, u64), ServiceError> {
        let paginator = Settlement::find()
            .order_by_desc(settlement::Column::CreatedAt)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let settlements = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((settlements, total))
    }

}

async fn generate_settlement_code<C: ConnectionTrait>(
    conn: &C,
    prefix: &str,
) -> Result<String, ServiceError> {
    for _ in 0..8 {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|c| (c as char).to_ascii_uppercase())
            .collect();
        let candidate = format!("{}-{}", prefix, suffix);
        let exists = Settlement::find()
            .filter(settlement::Column::SettlementCode.eq(candidate.as_str()))
            .one(conn)
            .await?
            .is_some();
        if !exists {
            return Ok(candidate);
        }
    }
    Err(ServiceError::InternalError(
        "failed to generate a unique settlement code".into(),
    ))
}

/// Flips a set of pending usage records to settled under `settlement_code`.
/// The UPDATE is filtered on the pending status that was read, so a record
/// settled by a racing writer fails the whole settlement with
/// `ConcurrentModification` instead of double-settling it.
pub(crate) async fn settle_pending_records<C: ConnectionTrait>(
    conn: &C,
    record_ids: &[Uuid],
    settlement_code: &str,
    scope_label: &str,
) -> Result<u64, ServiceError> {
    let updated = UsageRecord::update_many()
        .col_expr(
            usage_record::Column::SettlementStatus,
            Expr::value(SettlementStatus::Settled.as_str()),
        )
        .col_expr(
            usage_record::Column::SettlementCode,
            Expr::value(settlement_code.to_string()),
        )
        .col_expr(usage_record::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(usage_record::Column::Id.is_in(record_ids.to_vec()))
        .filter(
            usage_record::Column::SettlementStatus.eq(SettlementStatus::Pending.as_str()),
        )
        .exec(conn)
        .await?;
    if updated.rows_affected != record_ids.len() as u64 {
        return Err(ServiceError::ConcurrentModification(
            scope_label.to_string(),
        ));
    }
    Ok(updated.rows_affected)
}

fn pending_records_query(debtor_site_id: Uuid) -> sea_orm::Select<UsageRecord> {
    UsageRecord::find()
        .filter(usage_record::Column::UsageSiteId.eq(debtor_site_id))
        .filter(usage_record::Column::SettlementStatus.eq(SettlementStatus::Pending.as_str()))
        .order_by_asc(usage_record::Column::UsageDate)
        .order_by_asc(usage_record::Column::CreatedAt)
}

/// Marks batches touched by the settled records as completed when their
/// stock is exhausted and no pending usage remains against them. Batch
/// completion normally happens at consumption time, so this mostly
/// confirms rather than transitions.
async fn complete_drained_batches<C: ConnectionTrait>(
    conn: &C,
    records: &[usage_record::Model],
) -> Result<Vec<String>, ServiceError> {
    let mut batch_ids: Vec<Uuid> = records.iter().map(|r| r.batch_id).collect();
    batch_ids.sort_unstable();
    batch_ids.dedup();

    let mut completed = Vec::new();
    for batch_id in batch_ids {
        let batch = match MaterialBatch::find_by_id(batch_id).one(conn).await? {
            Some(batch) => batch,
            None => continue,
        };
        if batch.status != BatchStatus::Open.as_str() || batch.remaining_qty > QTY_EPSILON {
            continue;
        }
        let still_pending = UsageRecord::find()
            .filter(usage_record::Column::BatchId.eq(batch_id))
            .filter(
                usage_record::Column::SettlementStatus.eq(SettlementStatus::Pending.as_str()),
            )
            .count(conn)
            .await?;
        if still_pending > 0 {
            continue;
        }

        let batch_ref = batch.batch_ref.clone();
        let mut active: material_batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Completed.as_str().to_string());
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        completed.push(batch_ref);
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrator::Migrator;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    async fn test_db() -> (DatabaseConnection, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("create temp dir for test database");
        let url = format!(
            "sqlite://{}?mode=rwc",
            tmp.path().join("settlements_unit.db").display()
        );
        let db = Database::connect(url)
            .await
            .expect("failed to open test database");
        Migrator::up(&db, None)
            .await
            .expect("failed to run migrations");
        (db, tmp)
    }

    async fn insert_pending_usage(
        db: &DatabaseConnection,
        batch_ref: &str,
    ) -> usage_record::Model {
        let now = Utc::now();
        usage_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_id: Set(Uuid::new_v4()),
            batch_ref: Set(batch_ref.to_string()),
            group_id: Set(Uuid::new_v4()),
            material_id: Set(Uuid::new_v4()),
            usage_site_id: Set(Uuid::new_v4()),
            paying_site_id: Set(Uuid::new_v4()),
            quantity: Set(dec!(10)),
            unit_cost: Set(dec!(290)),
            total_cost: Set(dec!(2900)),
            usage_date: Set(NaiveDate::from_ymd_opt(2025, 12, 6).unwrap()),
            work_description: Set(None),
            settlement_status: Set(SettlementStatus::Pending.as_str().to_string()),
            settlement_code: Set(None),
            created_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("failed to insert test usage record")
    }

    #[tokio::test]
    async fn settling_a_concurrently_settled_record_is_rejected() {
        let (db, _tmp) = test_db().await;
        let first = insert_pending_usage(&db, "BATCH-001").await;
        let second = insert_pending_usage(&db, "BATCH-001").await;
        let ids = vec![first.id, second.id];

        // A racing writer settles one of the records between our read and
        // our write.
        settle_pending_records(&db, &[second.id], "STL-RACE0001", "BATCH-001")
            .await
            .unwrap();

        let err = settle_pending_records(&db, &ids, "STL-RACE0002", "BATCH-001")
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(_));

        // The untouched record keeps the racing writer's code, never ours.
        let row = UsageRecord::find_by_id(second.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.settlement_code.as_deref(), Some("STL-RACE0001"));
    }
}
