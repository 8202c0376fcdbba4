//! Read-through cache for consolidated material views.
//!
//! Consolidation is recomputed from open batches on demand and cached per
//! site group. Every mutating operation reports the group it touched so the
//! handler layer can invalidate exactly the affected key instead of relying
//! on implicit refetching.

use crate::allocation::ConsolidatedMaterial;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct CachedView {
    computed_at: Instant,
    data: Vec<ConsolidatedMaterial>,
}

pub struct ConsolidatedCache {
    entries: DashMap<Uuid, CachedView>,
    ttl: Duration,
}

impl ConsolidatedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached view for a group if it is still fresh.
    pub fn get(&self, group_id: Uuid) -> Option<Vec<ConsolidatedMaterial>> {
        let entry = self.entries.get(&group_id)?;
        if entry.computed_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&group_id);
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn put(&self, group_id: Uuid, data: Vec<ConsolidatedMaterial>) {
        self.entries.insert(
            group_id,
            CachedView {
                computed_at: Instant::now(),
                data,
            },
        );
    }

    /// Drops the cached view for a group after any batch mutation in it.
    pub fn invalidate(&self, group_id: Uuid) {
        self.entries.remove(&group_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn view() -> Vec<ConsolidatedMaterial> {
        vec![ConsolidatedMaterial {
            material_id: Uuid::from_u128(1),
            material_name: "Cement PPC".into(),
            unit: "bag".into(),
            total_remaining: dec!(40),
            batch_count: 2,
            weighted_avg_cost: dec!(305),
        }]
    }

    #[test]
    fn get_after_put_returns_view() {
        let cache = ConsolidatedCache::new(Duration::from_secs(60));
        let group = Uuid::from_u128(7);
        assert!(cache.get(group).is_none());

        cache.put(group, view());
        let cached = cache.get(group).expect("fresh entry");
        assert_eq!(cached[0].total_remaining, dec!(40));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ConsolidatedCache::new(Duration::from_secs(60));
        let group = Uuid::from_u128(7);
        cache.put(group, view());
        cache.invalidate(group);
        assert!(cache.get(group).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = ConsolidatedCache::new(Duration::ZERO);
        let group = Uuid::from_u128(7);
        cache.put(group, view());
        assert!(cache.get(group).is_none());
        assert_eq!(cache.len(), 0);
    }
}
