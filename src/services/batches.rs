//! Batch ledger: authoritative remaining quantities for group-purchase
//! batches, batch lifecycle transitions, and the consolidated material view.

use crate::allocation::{consolidate, BatchSnapshot, ConsolidatedMaterial, QTY_EPSILON};
use crate::cache::ConsolidatedCache;
use crate::entities::material_batch::{self, BatchStatus, Entity as MaterialBatch};
use crate::entities::material_expense;
use crate::entities::usage_record::{self, Entity as UsageRecord};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::{NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Input for registering a new group-purchase batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatchInput {
    pub batch_ref: Option<String>,
    pub group_id: Uuid,
    pub material_id: Uuid,
    pub material_name: String,
    pub brand: Option<String>,
    pub unit: String,
    pub paying_site_id: Uuid,
    pub purchase_date: NaiveDate,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub created_by: Option<String>,
}

/// Looks up a batch by its reference code.
pub(crate) async fn fetch_batch<C: ConnectionTrait>(
    conn: &C,
    batch_ref: &str,
) -> Result<material_batch::Model, ServiceError> {
    MaterialBatch::find()
        .filter(material_batch::Column::BatchRef.eq(batch_ref))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_ref)))
}

/// Reduces a batch's remaining quantity by `qty` as an atomic
/// compare-and-swap against the snapshot the caller read: the UPDATE is
/// filtered on the snapshot's `used_qty`, so a racing writer loses with
/// `ConcurrentModification` instead of silently over-drawing the batch.
/// Returns whether the batch auto-completed.
pub(crate) async fn apply_consumption<C: ConnectionTrait>(
    conn: &C,
    batch: &material_batch::Model,
    qty: Decimal,
) -> Result<bool, ServiceError> {
    if qty <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(qty));
    }

    if batch.status != BatchStatus::Open.as_str() {
        return Err(ServiceError::InvalidOperation(format!(
            "Batch {} is not open (status: {})",
            batch.batch_ref, batch.status
        )));
    }

    if qty > batch.remaining_qty + QTY_EPSILON {
        return Err(ServiceError::InsufficientStock {
            requested: qty,
            available: batch.remaining_qty,
        });
    }

    let new_used = batch.used_qty + qty;
    let mut new_remaining = batch.remaining_qty - qty;
    let completed = new_remaining <= QTY_EPSILON;
    if completed {
        new_remaining = Decimal::ZERO;
    }
    let new_status = if completed {
        BatchStatus::Completed
    } else {
        BatchStatus::Open
    };

    let result = MaterialBatch::update_many()
        .col_expr(material_batch::Column::UsedQty, Expr::value(new_used))
        .col_expr(
            material_batch::Column::RemainingQty,
            Expr::value(new_remaining),
        )
        .col_expr(
            material_batch::Column::Status,
            Expr::value(new_status.as_str()),
        )
        .col_expr(material_batch::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(material_batch::Column::Id.eq(batch.id))
        .filter(material_batch::Column::UsedQty.eq(batch.used_qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(
            batch.batch_ref.clone(),
        ));
    }

    Ok(completed)
}

/// Reverses a previous consumption, reopening the batch if it had
/// auto-completed. Same compare-and-swap discipline as `apply_consumption`.
/// Returns whether the batch was reopened.
pub(crate) async fn restore_consumption<C: ConnectionTrait>(
    conn: &C,
    batch: &material_batch::Model,
    qty: Decimal,
) -> Result<bool, ServiceError> {
    if batch.status == BatchStatus::Converted.as_str() {
        return Err(ServiceError::InvalidOperation(format!(
            "Batch {} was converted to an own-site purchase and cannot be restored",
            batch.batch_ref
        )));
    }
    if qty > batch.used_qty + QTY_EPSILON {
        return Err(ServiceError::InvalidOperation(format!(
            "Cannot restore {} to batch {}: only {} was consumed",
            qty, batch.batch_ref, batch.used_qty
        )));
    }

    let mut new_used = batch.used_qty - qty;
    if new_used <= QTY_EPSILON {
        new_used = Decimal::ZERO;
    }
    let new_remaining = batch.original_qty - new_used;
    let reopened = batch.status == BatchStatus::Completed.as_str();

    let result = MaterialBatch::update_many()
        .col_expr(material_batch::Column::UsedQty, Expr::value(new_used))
        .col_expr(
            material_batch::Column::RemainingQty,
            Expr::value(new_remaining),
        )
        .col_expr(
            material_batch::Column::Status,
            Expr::value(BatchStatus::Open.as_str()),
        )
        .col_expr(material_batch::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(material_batch::Column::Id.eq(batch.id))
        .filter(material_batch::Column::UsedQty.eq(batch.used_qty))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(
            batch.batch_ref.clone(),
        ));
    }

    Ok(reopened)
}

/// Open batches of a group (optionally one material) in FIFO order:
/// purchase date ascending, ties broken by batch reference.
pub(crate) async fn fetch_open_batches<C: ConnectionTrait>(
    conn: &C,
    group_id: Uuid,
    material_id: Option<Uuid>,
) -> Result<Vec<material_batch::Model>, ServiceError> {
    let mut query = MaterialBatch::find()
        .filter(material_batch::Column::GroupId.eq(group_id))
        .filter(material_batch::Column::Status.eq(BatchStatus::Open.as_str()))
        .order_by_asc(material_batch::Column::PurchaseDate)
        .order_by_asc(material_batch::Column::BatchRef);
    if let Some(material_id) = material_id {
        query = query.filter(material_batch::Column::MaterialId.eq(material_id));
    }
    query.all(conn).await.map_err(ServiceError::from)
}

/// Service for managing group-purchase batches
#[derive(Clone)]
pub struct BatchService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    consolidated_cache: Arc<ConsolidatedCache>,
}

impl BatchService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        consolidated_cache: Arc<ConsolidatedCache>,
    ) -> Self {
        Self {
            db,
            event_sender,
            consolidated_cache,
        }
    }

    /// Registers a new group-purchase batch with remaining = original.
    #[instrument(skip(self, input))]
    pub async fn create_batch(
        &self,
        input: CreateBatchInput,
    ) -> Result<material_batch::Model, ServiceError> {
        if input.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(input.quantity));
        }
        if input.unit_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "unit cost cannot be negative".into(),
            ));
        }

        let batch_ref = match input.batch_ref {
            Some(batch_ref) => {
                let trimmed = batch_ref.trim().to_string();
                if trimmed.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "batch reference cannot be blank".into(),
                    ));
                }
                if self.find_batch(&trimmed).await?.is_some() {
                    return Err(ServiceError::InvalidOperation(format!(
                        "Batch {} already exists",
                        trimmed
                    )));
                }
                trimmed
            }
            None => self.generate_batch_ref().await?,
        };

        let now = Utc::now();
        let total_amount = input.quantity * input.unit_cost;
        let model = material_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_ref: Set(batch_ref),
            group_id: Set(input.group_id),
            material_id: Set(input.material_id),
            material_name: Set(input.material_name),
            brand: Set(input.brand),
            unit: Set(input.unit),
            paying_site_id: Set(input.paying_site_id),
            purchase_date: Set(input.purchase_date),
            original_qty: Set(input.quantity),
            used_qty: Set(Decimal::ZERO),
            remaining_qty: Set(input.quantity),
            unit_cost: Set(input.unit_cost),
            total_amount: Set(total_amount),
            status: Set(BatchStatus::Open.as_str().to_string()),
            created_by: Set(input.created_by),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let batch = model.insert(&*self.db).await?;

        self.consolidated_cache.invalidate(batch.group_id);
        self.event_sender
            .send(Event::BatchCreated {
                batch_id: batch.id,
                batch_ref: batch.batch_ref.clone(),
                group_id: batch.group_id,
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!(batch_ref = %batch.batch_ref, group_id = %batch.group_id, "batch created");
        Ok(batch)
    }

    /// Gets a batch by its reference code.
    #[instrument(skip(self))]
    pub async fn get_batch(&self, batch_ref: &str) -> Result<material_batch::Model, ServiceError> {
        self.find_batch(batch_ref)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_ref)))
    }

    /// Current remaining quantity for a batch.
    #[instrument(skip(self))]
    pub async fn get_remaining(&self, batch_ref: &str) -> Result<Decimal, ServiceError> {
        Ok(self.get_batch(batch_ref).await?.remaining_qty)
    }

    /// Open batches of a group in FIFO order, optionally one material.
    #[instrument(skip(self))]
    pub async fn list_open_batches(
        &self,
        group_id: Uuid,
        material_id: Option<Uuid>,
    ) -> Result<Vec<material_batch::Model>, ServiceError> {
        fetch_open_batches(&*self.db, group_id, material_id).await
    }

    /// All batches of a group with pagination, newest purchase first.
    #[instrument(skip(self))]
    pub async fn list_batches(
        &self,
        group_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<material_batch::Model>, u64), ServiceError> {
        let paginator = MaterialBatch::find()
            .filter(material_batch::Column::GroupId.eq(group_id))
            .order_by_desc(material_batch::Column::PurchaseDate)
            .order_by_desc(material_batch::Column::CreatedAt)
            .paginate(&*self.db, limit);

        let total = paginator.num_items().await?;
        let batches = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((batches, total))
    }

    /// Consolidated per-material view over open batches, served through the
    /// read-through cache.
    #[instrument(skip(self))]
    pub async fn consolidated_view(
        &self,
        group_id: Uuid,
    ) -> Result<Vec<ConsolidatedMaterial>, ServiceError> {
        if let Some(cached) = self.consolidated_cache.get(group_id) {
            return Ok(cached);
        }

        let batches = self.list_open_batches(group_id, None).await?;
        let snapshots: Vec<BatchSnapshot> = batches.iter().map(BatchSnapshot::from).collect();
        let view = consolidate(&snapshots);
        self.consolidated_cache.put(group_id, view.clone());
        Ok(view)
    }

    /// Converts a never-shared batch into a plain own-site purchase:
    /// marks it converted and books the full amount as an expense on the
    /// paying site.
    #[instrument(skip(self))]
    pub async fn convert_to_own_purchase(
        &self,
        batch_ref: &str,
    ) -> Result<material_batch::Model, ServiceError> {
        let batch_ref = batch_ref.to_string();
        let db = self.db.clone();

        let (batch, expense) = db
            .transaction::<_, (material_batch::Model, material_expense::Model), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let batch = MaterialBatch::find()
                            .filter(material_batch::Column::BatchRef.eq(batch_ref.as_str()))
                            .one(txn)
                            .await?
                            .ok_or_else(|| {
                                ServiceError::NotFound(format!("Batch {} not found", batch_ref))
                            })?;

                        if batch.status != BatchStatus::Open.as_str() {
                            return Err(ServiceError::InvalidOperation(format!(
                                "Batch {} is not open (status: {})",
                                batch_ref, batch.status
                            )));
                        }

                        let shared = UsageRecord::find()
                            .filter(usage_record::Column::BatchId.eq(batch.id))
                            .filter(
                                usage_record::Column::UsageSiteId.ne(batch.paying_site_id),
                            )
                            .count(txn)
                            .await?;
                        if shared > 0 {
                            return Err(ServiceError::InvalidOperation(format!(
                                "Batch {} has cross-site usage and cannot be converted",
                                batch_ref
                            )));
                        }

                        let mut active: material_batch::ActiveModel = batch.clone().into();
                        active.status = Set(BatchStatus::Converted.as_str().to_string());
                        active.updated_at = Set(Utc::now());
                        let batch = active.update(txn).await?;

                        let expense = material_expense::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            site_id: Set(batch.paying_site_id),
                            amount: Set(batch.total_amount),
                            description: Set(format!(
                                "Own-site purchase of {} (batch {})",
                                batch.material_name, batch.batch_ref
                            )),
                            batch_ref: Set(Some(batch.batch_ref.clone())),
                            settlement_code: Set(None),
                            usage_record_id: Set(None),
                            payment_mode: Set(None),
                            payment_date: Set(Some(batch.purchase_date)),
                            payment_reference: Set(None),
                            proof_ref: Set(None),
                            created_at: Set(Utc::now()),
                        }
                        .insert(txn)
                        .await?;

                        Ok((batch, expense))
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        self.consolidated_cache.invalidate(batch.group_id);
        self.event_sender
            .send(Event::BatchConverted {
                batch_ref: batch.batch_ref.clone(),
                paying_site_id: batch.paying_site_id,
            })
            .await
            .map_err(ServiceError::EventError)?;
        self.event_sender
            .send(Event::ExpenseCreated {
                expense_id: expense.id,
                site_id: expense.site_id,
                amount: expense.amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(batch)
    }

    async fn find_batch(
        &self,
        batch_ref: &str,
    ) -> Result<Option<material_batch::Model>, ServiceError> {
        MaterialBatch::find()
            .filter(material_batch::Column::BatchRef.eq(batch_ref))
            .one(&*self.db)
            .await
            .map_err(ServiceError::from)
    }

    async fn generate_batch_ref(&self) -> Result<String, ServiceError> {
        for _ in 0..8 {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(|c| (c as char).to_ascii_uppercase())
                .collect();
            let candidate = format!("BATCH-{}", suffix);
            if self.find_batch(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "failed to generate a unique batch reference".into(),
        ))
    }
}

/// Maps sea-orm's transaction error wrapper back onto ServiceError.
pub(crate) fn unwrap_transaction_error(err: TransactionError<ServiceError>) -> ServiceError {
    match err {
        TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
        TransactionError::Transaction(service_err) => service_err,
    }
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
            tmp.path().join("batches_unit.db").display()
        );
        let db = Database::connect(url)
            .await
            .expect("failed to open test database");
        Migrator::up(&db, None)
            .await
            .expect("failed to run migrations");
        (db, tmp)
    }

    async fn insert_batch(
        db: &DatabaseConnection,
        batch_ref: &str,
        qty: Decimal,
    ) -> material_batch::Model {
        let now = Utc::now();
        material_batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            batch_ref: Set(batch_ref.to_string()),
            group_id: Set(Uuid::new_v4()),
            material_id: Set(Uuid::new_v4()),
            material_name: Set("Cement PPC".to_string()),
            brand: Set(None),
            unit: Set("bag".to_string()),
            paying_site_id: Set(Uuid::new_v4()),
            purchase_date: Set(NaiveDate::from_ymd_opt(2025, 12, 5).unwrap()),
            original_qty: Set(qty),
            used_qty: Set(Decimal::ZERO),
            remaining_qty: Set(qty),
            unit_cost: Set(dec!(290)),
            total_amount: Set(qty * dec!(290)),
            status: Set(BatchStatus::Open.as_str().to_string()),
            created_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .expect("failed to insert test batch")
    }

    #[tokio::test]
    async fn consumption_with_stale_snapshot_is_rejected() {
        let (db, _tmp) = test_db().await;
        let stale = insert_batch(&db, "BATCH-CAS", dec!(100)).await;

        // The first writer based on this snapshot wins.
        let completed = apply_consumption(&db, &stale, dec!(10)).await.unwrap();
        assert!(!completed);

        // A second writer still holding used_qty = 0 must lose, even though
        // the batch has plenty of stock left.
        let err = apply_consumption(&db, &stale, dec!(10)).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(_));

        // A fresh read observes the first write and goes through.
        let fresh = fetch_batch(&db, "BATCH-CAS").await.unwrap();
        assert_eq!(fresh.used_qty, dec!(10));
        let completed = apply_consumption(&db, &fresh, dec!(90)).await.unwrap();
        assert!(completed);

        let drained = fetch_batch(&db, "BATCH-CAS").await.unwrap();
        assert_eq!(drained.status, BatchStatus::Completed.as_str());
        assert_eq!(drained.remaining_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn restore_with_stale_snapshot_is_rejected() {
        let (db, _tmp) = test_db().await;
        let batch = insert_batch(&db, "BATCH-CAS-R", dec!(50)).await;
        apply_consumption(&db, &batch, dec!(50)).await.unwrap();

        let consumed = fetch_batch(&db, "BATCH-CAS-R").await.unwrap();
        let reopened = restore_consumption(&db, &consumed, dec!(20)).await.unwrap();
        assert!(reopened);

        // Reusing the pre-restore snapshot no longer matches the row.
        let err = restore_consumption(&db, &consumed, dec!(20))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(_));

        let fresh = fetch_batch(&db, "BATCH-CAS-R").await.unwrap();
        assert_eq!(fresh.used_qty, dec!(30));
        assert_eq!(fresh.remaining_qty, dec!(20));
        assert_eq!(fresh.status, BatchStatus::Open.as_str());
    }
}
