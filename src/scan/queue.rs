use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::node::types::ChainBox;

/// In-memory eligibility queue: candidate boxes bucketed by creation height,
/// waiting for the chain to outgrow their rent window.
///
/// Single-writer by design; only the orchestrator cycle mutates it.
/// Confirmation monitors never touch it.
#[derive(Debug, Default)]
pub struct EligibilityQueue {
    buckets: BTreeMap<u32, Vec<ChainBox>>,
    ids: HashSet<String>,
}

/// Result of a promotion pass. Buckets are drained whole; `claimable`
/// preserves discovery order within each height.
#[derive(Debug, Default)]
pub struct Promotion {
    pub claimable: Vec<ChainBox>,
    pub emptied_heights: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub queued_count: usize,
    /// First chain height at which the nearest bucket would promote.
    pub next_eligible_height: Option<u64>,
    pub next_eligible_box_ids: Vec<String>,
}

impl EligibilityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a box into its creation-height bucket. Returns false if the id
    /// is already queued, making re-scans idempotent.
    pub fn insert(&mut self, b: ChainBox) -> bool {
        if self.ids.contains(&b.box_id) {
            return false;
        }
        self.ids.insert(b.box_id.clone());
        self.buckets.entry(b.creation_height).or_default().push(b);
        true
    }

    pub fn contains(&self, box_id: &str) -> bool {
        self.ids.contains(box_id)
    }

    pub fn queued_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids of every queued box, for scanner deduplication.
    pub fn queued_ids(&self) -> &HashSet<String> {
        &self.ids
    }

    /// Promote every bucket whose boxes have aged past the rent window.
    ///
    /// A bucket qualifies when `height + min_age < current_height` — strict,
    /// so boxes at the exact boundary are held one more cycle to tolerate a
    /// node whose reported height lags by one block. Buckets move whole or
    /// not at all.
    pub fn promote(&mut self, current_height: u32, min_age_blocks: u32) -> Promotion {
        let mut promo = Promotion::default();

        let ripe: Vec<u32> = self
            .buckets
            .keys()
            .copied()
            .take_while(|h| u64::from(*h) + u64::from(min_age_blocks) < u64::from(current_height))
            .collect();

        for height in ripe {
            if let Some(boxes) = self.buckets.remove(&height) {
                for b in &boxes {
                    self.ids.remove(&b.box_id);
                }
                debug!(
                    "Promoting {} box(es) bucketed at height {}",
                    boxes.len(),
                    height
                );
                promo.claimable.extend(boxes);
                promo.emptied_heights.push(height);
            }
        }

        promo
    }

    /// Observability snapshot: queue depth and the nearest upcoming
    /// promotion. An empty promotion is normal operation, not an error.
    pub fn status(&self, min_age_blocks: u32) -> QueueStatus {
        let next = self.buckets.iter().next();
        QueueStatus {
            queued_count: self.ids.len(),
            next_eligible_height: next
                .map(|(h, _)| u64::from(*h) + u64::from(min_age_blocks) + 1),
            next_eligible_box_ids: next
                .map(|(_, boxes)| boxes.iter().map(|b| b.box_id.clone()).collect())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box(id: &str, creation_height: u32) -> ChainBox {
        ChainBox {
            box_id: id.to_string(),
            value: 500_000_000,
            ergo_tree: "0008cd02deadbeef".to_string(),
            assets: vec![],
            creation_height,
            additional_registers: Default::default(),
            size: 105,
            spent_transaction_id: None,
        }
    }

    #[test]
    fn test_insert_deduplicates() {
        let mut q = EligibilityQueue::new();
        assert!(q.insert(test_box("a", 100)));
        assert!(!q.insert(test_box("a", 100)));
        assert!(!q.insert(test_box("a", 200))); // same id, different bucket
        assert_eq!(q.queued_count(), 1);
    }

    #[test]
    fn test_promotion_boundary() {
        // creation 1000, window 500: at height 1500 the bucket holds,
        // at 1501 it releases.
        let mut q = EligibilityQueue::new();
        q.insert(test_box("a", 1000));

        let promo = q.promote(1500, 500);
        assert!(promo.claimable.is_empty());
        assert_eq!(q.queued_count(), 1);

        let promo = q.promote(1501, 500);
        assert_eq!(promo.claimable.len(), 1);
        assert_eq!(promo.emptied_heights, vec![1000]);
        assert_eq!(q.queued_count(), 0);
    }

    #[test]
    fn test_promotion_idempotent() {
        let mut q = EligibilityQueue::new();
        q.insert(test_box("a", 1000));
        q.insert(test_box("b", 1000));

        let first = q.promote(2000, 500);
        assert_eq!(first.claimable.len(), 2);

        let second = q.promote(2000, 500);
        assert!(second.claimable.is_empty());
        assert!(second.emptied_heights.is_empty());
    }

    #[test]
    fn test_buckets_move_whole() {
        let mut q = EligibilityQueue::new();
        q.insert(test_box("a", 1000));
        q.insert(test_box("b", 1000));
        q.insert(test_box("c", 1600));

        let promo = q.promote(1501, 500);
        let ids: Vec<&str> = promo.claimable.iter().map(|b| b.box_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]); // discovery order preserved
        assert!(q.contains("c"));
    }

    #[test]
    fn test_status_reports_nearest_bucket() {
        let mut q = EligibilityQueue::new();
        q.insert(test_box("late", 2000));
        q.insert(test_box("soon", 1000));

        let status = q.status(500);
        assert_eq!(status.queued_count, 2);
        assert_eq!(status.next_eligible_height, Some(1501));
        assert_eq!(status.next_eligible_box_ids, vec!["soon".to_string()]);
    }

    #[test]
    fn test_low_heights_never_underflow() {
        let mut q = EligibilityQueue::new();
        q.insert(test_box("genesis", 0));
        let promo = q.promote(10, 500);
        assert!(promo.claimable.is_empty());
    }
}
