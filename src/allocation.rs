//! Pure FIFO allocation over open group-purchase batches.
//!
//! Everything in this module is deterministic and side-effect-free so the
//! UI can call `allocate` repeatedly to render a preview before committing
//! through the usage recorder.

use crate::entities::material_batch;
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Tolerance for remaining-quantity comparisons. Decimal quantities come
/// from user input with up to 4 fractional digits; anything at or below
/// this is treated as zero.
pub const QTY_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Read-only view of one open batch, detached from the ORM so the
/// allocator can be exercised without a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_ref: String,
    pub material_id: Uuid,
    pub material_name: String,
    pub unit: String,
    pub paying_site_id: Uuid,
    pub purchase_date: chrono::NaiveDate,
    pub remaining_qty: Decimal,
    pub unit_cost: Decimal,
}

impl From<&material_batch::Model> for BatchSnapshot {
    fn from(model: &material_batch::Model) -> Self {
        Self {
            batch_ref: model.batch_ref.clone(),
            material_id: model.material_id,
            material_name: model.material_name.clone(),
            unit: model.unit.clone(),
            paying_site_id: model.paying_site_id,
            purchase_date: model.purchase_date,
            remaining_qty: model.remaining_qty,
            unit_cost: model.unit_cost,
        }
    }
}

/// One line of an allocation plan: how much of a specific batch a usage
/// request would consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AllocationLine {
    pub batch_ref: String,
    #[schema(value_type = String)]
    pub quantity: Decimal,
    #[schema(value_type = String)]
    pub unit_cost: Decimal,
    #[schema(value_type = String)]
    pub total_cost: Decimal,
    #[schema(value_type = String)]
    pub remaining_after: Decimal,
    pub will_complete: bool,
}

/// Full preview of how a requested quantity maps onto open batches,
/// ordered oldest batch first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AllocationPlan {
    pub material_id: Uuid,
    pub lines: Vec<AllocationLine>,
    #[schema(value_type = String)]
    pub total_quantity: Decimal,
    #[schema(value_type = String)]
    pub total_cost: Decimal,
    /// Number of batches this plan would fully exhaust.
    pub completing_batches: usize,
}

/// Read-time aggregation across all open batches of one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConsolidatedMaterial {
    pub material_id: Uuid,
    pub material_name: String,
    pub unit: String,
    #[schema(value_type = String)]
    pub total_remaining: Decimal,
    pub batch_count: usize,
    /// Weighted-average unit cost over remaining quantity.
    #[schema(value_type = String)]
    pub weighted_avg_cost: Decimal,
}

/// Sorts batches into FIFO consumption order: purchase date ascending,
/// ties broken by batch reference code for determinism.
fn fifo_order(a: &BatchSnapshot, b: &BatchSnapshot) -> std::cmp::Ordering {
    a.purchase_date
        .cmp(&b.purchase_date)
        .then_with(|| a.batch_ref.cmp(&b.batch_ref))
}

/// Groups open batches by material, summing remaining quantity and
/// computing the weighted-average unit cost.
pub fn consolidate(batches: &[BatchSnapshot]) -> Vec<ConsolidatedMaterial> {
    let mut by_material: Vec<ConsolidatedMaterial> = Vec::new();
    let mut weighted_sums: Vec<Decimal> = Vec::new();

    for batch in batches {
        if batch.remaining_qty <= QTY_EPSILON {
            continue;
        }
        match by_material
            .iter_mut()
            .zip(weighted_sums.iter_mut())
            .find(|(entry, _)| entry.material_id == batch.material_id)
        {
            Some((entry, weighted)) => {
                entry.total_remaining += batch.remaining_qty;
                entry.batch_count += 1;
                *weighted += batch.remaining_qty * batch.unit_cost;
            }
            None => {
                by_material.push(ConsolidatedMaterial {
                    material_id: batch.material_id,
                    material_name: batch.material_name.clone(),
                    unit: batch.unit.clone(),
                    total_remaining: batch.remaining_qty,
                    batch_count: 1,
                    weighted_avg_cost: Decimal::ZERO,
                });
                weighted_sums.push(batch.remaining_qty * batch.unit_cost);
            }
        }
    }

    for (entry, weighted) in by_material.iter_mut().zip(weighted_sums.iter()) {
        if !entry.total_remaining.is_zero() {
            entry.weighted_avg_cost = weighted / entry.total_remaining;
        }
    }

    by_material
}

/// Produces the minimal FIFO allocation satisfying `requested_qty` of
/// `material_id` from the given open batches.
///
/// Fails with `InvalidQuantity` for non-positive requests and with
/// `InsufficientStock` (reporting the available total) when the open
/// batches cannot cover the request; a partial plan is never returned.
pub fn allocate(
    batches: &[BatchSnapshot],
    material_id: Uuid,
    requested_qty: Decimal,
) -> Result<AllocationPlan, ServiceError> {
    if requested_qty <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(requested_qty));
    }

    let mut open: Vec<&BatchSnapshot> = batches
        .iter()
        .filter(|b| b.material_id == material_id && b.remaining_qty > QTY_EPSILON)
        .collect();
    open.sort_by(|a, b| fifo_order(a, b));

    let available: Decimal = open.iter().map(|b| b.remaining_qty).sum();
    if available < requested_qty {
        return Err(ServiceError::InsufficientStock {
            requested: requested_qty,
            available,
        });
    }

    let mut lines = Vec::new();
    let mut still_needed = requested_qty;
    let mut total_cost = Decimal::ZERO;
    let mut completing = 0usize;

    for batch in open {
        if still_needed <= Decimal::ZERO {
            break;
        }
        let take = batch.remaining_qty.min(still_needed);
        let remaining_after = batch.remaining_qty - take;
        let will_complete = remaining_after <= QTY_EPSILON;
        let line_cost = take * batch.unit_cost;

        if will_complete {
            completing += 1;
        }
        total_cost += line_cost;
        still_needed -= take;

        lines.push(AllocationLine {
            batch_ref: batch.batch_ref.clone(),
            quantity: take,
            unit_cost: batch.unit_cost,
            total_cost: line_cost,
            remaining_after,
            will_complete,
        });
    }

    Ok(AllocationPlan {
        material_id,
        lines,
        total_quantity: requested_qty,
        total_cost,
        completing_batches: completing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn material() -> Uuid {
        Uuid::from_u128(0xCE11)
    }

    fn site() -> Uuid {
        Uuid::from_u128(0xA)
    }

    fn batch(
        batch_ref: &str,
        date: (i32, u32, u32),
        remaining: Decimal,
        unit_cost: Decimal,
    ) -> BatchSnapshot {
        BatchSnapshot {
            batch_ref: batch_ref.to_string(),
            material_id: material(),
            material_name: "Cement PPC".to_string(),
            unit: "bag".to_string(),
            paying_site_id: site(),
            purchase_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            remaining_qty: remaining,
            unit_cost,
        }
    }

    #[test]
    fn draws_from_oldest_batch_first() {
        let batches = vec![
            batch("BATCH-002", (2025, 12, 5), dec!(10), dec!(300)),
            batch("BATCH-001", (2025, 12, 1), dec!(10), dec!(290)),
        ];

        let plan = allocate(&batches, material(), dec!(15)).unwrap();
        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].batch_ref, "BATCH-001");
        assert_eq!(plan.lines[0].quantity, dec!(10));
        assert!(plan.lines[0].will_complete);
        assert_eq!(plan.lines[1].batch_ref, "BATCH-002");
        assert_eq!(plan.lines[1].quantity, dec!(5));
        assert!(!plan.lines[1].will_complete);
        assert_eq!(plan.completing_batches, 1);
    }

    #[test]
    fn tie_on_purchase_date_breaks_by_batch_ref() {
        let batches = vec![
            batch("BATCH-B", (2025, 12, 1), dec!(5), dec!(100)),
            batch("BATCH-A", (2025, 12, 1), dec!(5), dec!(100)),
        ];

        let plan = allocate(&batches, material(), dec!(3)).unwrap();
        assert_eq!(plan.lines[0].batch_ref, "BATCH-A");
    }

    #[test]
    fn exact_exhaustion_completes_every_batch() {
        let batches = vec![
            batch("BATCH-001", (2025, 12, 1), dec!(10), dec!(290)),
            batch("BATCH-002", (2025, 12, 2), dec!(20), dec!(295)),
        ];

        let plan = allocate(&batches, material(), dec!(30)).unwrap();
        assert_eq!(plan.completing_batches, 2);
        assert!(plan.lines.iter().all(|l| l.will_complete));
        assert_eq!(plan.total_cost, dec!(10) * dec!(290) + dec!(20) * dec!(295));
    }

    #[test]
    fn over_request_reports_available_total() {
        let batches = vec![
            batch("BATCH-001", (2025, 12, 1), dec!(30), dec!(290)),
            batch("BATCH-002", (2025, 12, 2), dec!(12), dec!(295)),
        ];

        let err = allocate(&batches, material(), dec!(50)).unwrap_err();
        assert_matches!(
            err,
            ServiceError::InsufficientStock {
                requested,
                available
            } if requested == dec!(50) && available == dec!(42)
        );
    }

    #[test]
    fn zero_and_negative_requests_rejected() {
        let batches = vec![batch("BATCH-001", (2025, 12, 1), dec!(10), dec!(290))];
        assert_matches!(
            allocate(&batches, material(), dec!(0)),
            Err(ServiceError::InvalidQuantity(_))
        );
        assert_matches!(
            allocate(&batches, material(), dec!(-4)),
            Err(ServiceError::InvalidQuantity(_))
        );
    }

    #[test]
    fn other_materials_are_ignored() {
        let mut other = batch("BATCH-XYZ", (2025, 11, 1), dec!(100), dec!(50));
        other.material_id = Uuid::from_u128(0xBEEF);
        let batches = vec![
            other,
            batch("BATCH-001", (2025, 12, 1), dec!(10), dec!(290)),
        ];

        let plan = allocate(&batches, material(), dec!(10)).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].batch_ref, "BATCH-001");
    }

    #[test]
    fn cement_scenario_single_batch() {
        // BATCH-001: 100 bags @ 290. Site B takes 45, then Site C takes 55.
        let full = vec![batch("BATCH-001", (2025, 12, 1), dec!(100), dec!(290))];
        let plan_b = allocate(&full, material(), dec!(45)).unwrap();
        assert_eq!(plan_b.lines.len(), 1);
        assert_eq!(plan_b.lines[0].total_cost, dec!(13050));
        assert_eq!(plan_b.lines[0].remaining_after, dec!(55));
        assert!(!plan_b.lines[0].will_complete);

        let after_b = vec![batch("BATCH-001", (2025, 12, 1), dec!(55), dec!(290))];
        let plan_c = allocate(&after_b, material(), dec!(55)).unwrap();
        assert_eq!(plan_c.lines[0].total_cost, dec!(15950));
        assert_eq!(plan_c.lines[0].remaining_after, dec!(0));
        assert!(plan_c.lines[0].will_complete);
    }

    #[test]
    fn consolidate_computes_weighted_average() {
        let batches = vec![
            batch("BATCH-001", (2025, 12, 1), dec!(10), dec!(290)),
            batch("BATCH-002", (2025, 12, 2), dec!(30), dec!(310)),
        ];

        let consolidated = consolidate(&batches);
        assert_eq!(consolidated.len(), 1);
        let entry = &consolidated[0];
        assert_eq!(entry.total_remaining, dec!(40));
        assert_eq!(entry.batch_count, 2);
        // (10*290 + 30*310) / 40 = 305
        assert_eq!(entry.weighted_avg_cost, dec!(305));
    }

    #[test]
    fn consolidate_skips_exhausted_batches() {
        let batches = vec![
            batch("BATCH-001", (2025, 12, 1), dec!(0), dec!(290)),
            batch("BATCH-002", (2025, 12, 2), dec!(5), dec!(310)),
        ];

        let consolidated = consolidate(&batches);
        assert_eq!(consolidated.len(), 1);
        assert_eq!(consolidated[0].batch_count, 1);
        assert_eq!(consolidated[0].total_remaining, dec!(5));
    }

    proptest! {
        /// Conservation: the plan's line quantities always sum to the
        /// requested amount, and no line exceeds its batch's remaining.
        #[test]
        fn allocation_conserves_quantity(
            remainings in proptest::collection::vec(1u32..=500, 1..8),
            requested_pct in 1u32..=100,
        ) {
            let batches: Vec<BatchSnapshot> = remainings
                .iter()
                .enumerate()
                .map(|(i, r)| batch(
                    &format!("BATCH-{:03}", i),
                    (2025, 1, (i as u32 % 28) + 1),
                    Decimal::from(*r),
                    dec!(290),
                ))
                .collect();

            let total: Decimal = batches.iter().map(|b| b.remaining_qty).sum();
            let requested = (total * Decimal::from(requested_pct) / dec!(100)).round_dp(4);
            prop_assume!(requested > Decimal::ZERO);

            let plan = allocate(&batches, material(), requested).unwrap();
            let line_sum: Decimal = plan.lines.iter().map(|l| l.quantity).sum();
            prop_assert_eq!(line_sum, requested);

            for line in &plan.lines {
                let source = batches.iter().find(|b| b.batch_ref == line.batch_ref).unwrap();
                prop_assert!(line.quantity <= source.remaining_qty);
                prop_assert_eq!(line.remaining_after, source.remaining_qty - line.quantity);
            }
        }

        /// FIFO coverage: every batch older than a partially-consumed batch
        /// must be fully consumed by the plan.
        #[test]
        fn fifo_never_skips_older_stock(
            remainings in proptest::collection::vec(1u32..=100, 2..6),
        ) {
            let batches: Vec<BatchSnapshot> = remainings
                .iter()
                .enumerate()
                .map(|(i, r)| batch(
                    &format!("BATCH-{:03}", i),
                    (2025, 2, (i as u32) + 1),
                    Decimal::from(*r),
                    dec!(100),
                ))
                .collect();

            let total: Decimal = batches.iter().map(|b| b.remaining_qty).sum();
            let requested = total - Decimal::ONE;
            prop_assume!(requested > Decimal::ZERO);

            let plan = allocate(&batches, material(), requested).unwrap();
            // Only the newest line may be partial.
            for line in &plan.lines[..plan.lines.len() - 1] {
                prop_assert!(line.will_complete, "older batch left partially consumed");
            }
        }
    }
}
