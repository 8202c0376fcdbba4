//! Usage recorder: turns allocation plans into committed usage records,
//! consuming batch stock and expensing self-use in one transaction.

use crate::allocation::{allocate, AllocationPlan, BatchSnapshot};
use crate::entities::material_expense;
use crate::entities::usage_record::{self, Entity as UsageRecord, SettlementStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::batches::{
    apply_consumption, fetch_batch, fetch_open_batches, restore_consumption,
    unwrap_transaction_error,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// One batch/quantity pair in a usage request, normally taken verbatim
/// from a previewed allocation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAllocation {
    pub batch_ref: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordUsageInput {
    pub usage_site_id: Uuid,
    pub usage_date: NaiveDate,
    pub allocations: Vec<UsageAllocation>,
    pub work_description: Option<String>,
    pub created_by: Option<String>,
}

/// Result of a committed usage request.
#[derive(Debug, Clone)]
pub struct UsageCommit {
    pub records: Vec<usage_record::Model>,
    pub expenses: Vec<material_expense::Model>,
    pub completed_batches: Vec<String>,
    pub group_id: Uuid,
    pub total_quantity: Decimal,
    pub total_cost: Decimal,
    pub cross_site: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteUsageOutcome {
    pub usage_id: Uuid,
    pub batch_ref: String,
    pub quantity: Decimal,
    pub group_id: Uuid,
    pub reopened: bool,
}

/// Filters for listing usage records.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub usage_site_id: Option<Uuid>,
    pub batch_ref: Option<String>,
    pub settlement_status: Option<String>,
}

/// Service for recording and reversing material usage
#[derive(Clone)]
pub struct UsageService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl UsageService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Computes the FIFO allocation a usage request would commit, without
    /// touching any state.
    #[instrument(skip(self))]
    pub async fn preview_usage(
        &self,
        group_id: Uuid,
        material_id: Uuid,
        quantity: Decimal,
    ) -> Result<AllocationPlan, ServiceError> {
        let batches = fetch_open_batches(&*self.db, group_id, Some(material_id)).await?;
        let snapshots: Vec<BatchSnapshot> = batches.iter().map(BatchSnapshot::from).collect();
        allocate(&snapshots, material_id, quantity)
    }

    /// Commits a usage request in a single transaction: every allocation
    /// line consumes its batch (compare-and-swap), creates a usage record
    /// priced at the batch's unit cost, and self-use lines are expensed on
    /// the spot instead of entering an inter-site balance.
    #[instrument(skip(self, input), fields(usage_site_id = %input.usage_site_id))]
    pub async fn record_usage(&self, input: RecordUsageInput) -> Result<UsageCommit, ServiceError> {
        if input.allocations.is_empty() {
            return Err(ServiceError::ValidationError(
                "at least one allocation line is required".into(),
            ));
        }
        for line in &input.allocations {
            if line.quantity <= Decimal::ZERO {
                return Err(ServiceError::InvalidQuantity(line.quantity));
            }
        }

        let db = self.db.clone();
        let commit = db
            .transaction::<_, UsageCommit, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let mut records = Vec::with_capacity(input.allocations.len());
                    let mut expenses = Vec::new();
                    let mut completed_batches = Vec::new();
                    let mut total_quantity = Decimal::ZERO;
                    let mut total_cost = Decimal::ZERO;
                    let mut cross_site = false;
                    let mut group_id: Option<Uuid> = None;

                    for line in &input.allocations {
                        let batch = fetch_batch(txn, &line.batch_ref).await?;
                        let completed = apply_consumption(txn, &batch, line.quantity).await?;
                        if completed {
                            completed_batches.push(batch.batch_ref.clone());
                        }
                        group_id.get_or_insert(batch.group_id);

                        let self_use = input.usage_site_id == batch.paying_site_id;
                        let line_cost = line.quantity * batch.unit_cost;
                        let status = if self_use {
                            SettlementStatus::SelfUse
                        } else {
                            SettlementStatus::Pending
                        };

                        let record = usage_record::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            batch_id: Set(batch.id),
                            batch_ref: Set(batch.batch_ref.clone()),
                            group_id: Set(batch.group_id),
                            material_id: Set(batch.material_id),
                            usage_site_id: Set(input.usage_site_id),
                            paying_site_id: Set(batch.paying_site_id),
                            quantity: Set(line.quantity),
                            unit_cost: Set(batch.unit_cost),
                            total_cost: Set(line_cost),
                            usage_date: Set(input.usage_date),
                            work_description: Set(input.work_description.clone()),
                            settlement_status: Set(status.as_str().to_string()),
                            settlement_code: Set(None),
                            created_by: Set(input.created_by.clone()),
                            created_at: Set(now),
                            updated_at: Set(now),
                        }
                        .insert(txn)
                        .await?;

                        if self_use {
                            let expense = material_expense::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                site_id: Set(batch.paying_site_id),
                                amount: Set(line_cost),
                                description: Set(format!(
                                    "Self-use of {} from batch {}",
                                    batch.material_name, batch.batch_ref
                                )),
                                batch_ref: Set(Some(batch.batch_ref.clone())),
                                settlement_code: Set(None),
                                usage_record_id: Set(Some(record.id)),
                                payment_mode: Set(None),
                                payment_date: Set(Some(input.usage_date)),
                                payment_reference: Set(None),
                                proof_ref: Set(None),
                                created_at: Set(now),
                            }
                            .insert(txn)
                            .await?;
                            expenses.push(expense);
                        } else {
                            cross_site = true;
                        }

                        total_quantity += line.quantity;
                        total_cost += line_cost;
                        records.push(record);
                    }

                    let group_id = group_id.ok_or_else(|| {
                        ServiceError::InternalError("usage commit produced no records".into())
                    })?;

                    Ok(UsageCommit {
                        records,
                        expenses,
                        completed_batches,
                        group_id,
                        total_quantity,
                        total_cost,
                        cross_site,
                    })
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::UsageRecorded {
                usage_site_id: commit.records[0].usage_site_id,
                batch_refs: commit
                    .records
                    .iter()
                    .map(|r| r.batch_ref.clone())
                    .collect(),
                total_quantity: commit.total_quantity,
                total_cost: commit.total_cost,
                cross_site: commit.cross_site,
            })
            .await
            .map_err(ServiceError::EventError)?;
        for batch_ref in &commit.completed_batches {
            self.event_sender
                .send(Event::BatchCompleted {
                    batch_ref: batch_ref.clone(),
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        for expense in &commit.expenses {
            self.event_sender
                .send(Event::ExpenseCreated {
                    expense_id: expense.id,
                    site_id: expense.site_id,
                    amount: expense.amount,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        info!(
            records = commit.records.len(),
            total_cost = %commit.total_cost,
            "usage recorded"
        );
        Ok(commit)
    }

    /// Deletes an unsettled usage record, restoring the consumed quantity
    /// to its batch and removing any self-use expense it generated.
    #[instrument(skip(self))]
    pub async fn delete_usage(&self, usage_id: Uuid) -> Result<DeleteUsageOutcome, ServiceError> {
        let db = self.db.clone();
        let outcome = db
            .transaction::<_, DeleteUsageOutcome, ServiceError>(move |txn| {
                Box::pin(async move {
                    let record = UsageRecord::find_by_id(usage_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Usage record {} not found", usage_id))
                        })?;

                    if record.settlement_status == SettlementStatus::Settled.as_str() {
                        return Err(ServiceError::AlreadySettled(format!(
                            "Usage record {} was settled under {} and cannot be deleted",
                            usage_id,
                            record.settlement_code.as_deref().unwrap_or("-")
                        )));
                    }

                    let batch = fetch_batch(txn, &record.batch_ref).await?;
                    let reopened =
                        restore_consumption(txn, &batch, record.quantity).await?;

                    material_expense::Entity::delete_many()
                        .filter(material_expense::Column::UsageRecordId.eq(record.id))
                        .exec(txn)
                        .await?;

                    let outcome = DeleteUsageOutcome {
                        usage_id: record.id,
                        batch_ref: record.batch_ref.clone(),
                        quantity: record.quantity,
                        group_id: record.group_id,
                        reopened,
                    };
                    record.delete(txn).await?;
                    Ok(outcome)
                })
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(Event::UsageDeleted {
                usage_id: outcome.usage_id,
                batch_ref: outcome.batch_ref.clone(),
                quantity: outcome.quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;
        if outcome.reopened {
            self.event_sender
                .send(Event::BatchReopened {
                    batch_ref: outcome.batch_ref.clone(),
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(outcome)
    }

    /// Gets a single usage record by id.
    #[instrument(skip(self))]
    pub async fn get_usage(&self, usage_id: Uuid) -> Result<usage_record::Model, ServiceError> {
        UsageRecord::find_by_id(usage_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Usage record {} not found", usage_id)))
    }

    /// Lists usage records with optional filters, newest usage first.
    #[instrument(skip(self))]
    pub async fn list_usage(
        &self,
        filter: UsageFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<usage_record::Model>, u64), ServiceError> {
        let mut query = UsageRecord::find()
            .order_by_desc(usage_record::Column::UsageDate)
            .order_by_desc(usage_record::Column::CreatedAt);

        if let Some(site_id) = filter.usage_site_id {
            query = query.filter(usage_record::Column::UsageSiteId.eq(site_id));
        }
        if let Some(batch_ref) = filter.batch_ref {
            query = query.filter(usage_record::Column::BatchRef.eq(batch_ref));
        }
        if let Some(status) = filter.settlement_status {
            query = query.filter(usage_record::Column::SettlementStatus.eq(status));
        }

        let paginator = query.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let records = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((records, total))
    }
}
