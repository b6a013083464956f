use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::node::client::LedgerNode;
use crate::node::types::ChainBox;
use crate::rent::RentSchedule;

/// Resumable position in the global box-id index.
///
/// `offset` moves monotonically oldest→newest and wraps to zero once the
/// index is exhausted, so boxes dropped as too far in the future get
/// another look on a later pass. `last_scan_height` gates how often a scan
/// runs at all, independent of the poll cadence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursor {
    pub offset: u64,
    pub last_scan_height: u32,
}

/// What one scan pass produced. Bucketed boxes are keyed by creation height;
/// insertion order within a bucket is discovery order.
#[derive(Debug, Default)]
pub struct ScanDelta {
    pub bucketed: BTreeMap<u32, Vec<ChainBox>>,
    /// Boxes that can never fund their own claim. Recorded as terminal and
    /// excluded from every future scan via the known-id set.
    pub value_rejected: Vec<ChainBox>,
    pub accepted: usize,
    pub skipped_known: usize,
    pub skipped_spent: usize,
    pub skipped_far_future: usize,
    pub fetch_errors: usize,
    pub exhausted: bool,
}

pub struct EligibilityScanner<'a, N: LedgerNode> {
    node: &'a N,
    schedule: RentSchedule,
    page_size: usize,
    look_ahead_blocks: u32,
}

impl<'a, N: LedgerNode> EligibilityScanner<'a, N> {
    pub fn new(
        node: &'a N,
        schedule: RentSchedule,
        page_size: usize,
        look_ahead_blocks: u32,
    ) -> Self {
        Self {
            node,
            schedule,
            page_size,
            look_ahead_blocks,
        }
    }

    /// Walk the box-id index from the cursor until `target_count` boxes are
    /// accepted or the index runs out.
    ///
    /// `known` holds every id already queued or tracked; those are skipped
    /// before any box fetch, which keeps re-scans idempotent and cheap.
    ///
    /// A failed box fetch is logged and skipped. A failed page fetch aborts
    /// the whole attempt with `Err` — the caller keeps its old cursor, so
    /// retrying next cycle is a safe no-op.
    pub async fn scan(
        &self,
        current_height: u32,
        cursor: &ScanCursor,
        target_count: usize,
        known: &HashSet<String>,
    ) -> Result<(ScanDelta, ScanCursor)> {
        let mut delta = ScanDelta::default();
        let mut next_offset = cursor.offset;

        info!(
            "Scanning box index from offset {} (target {} boxes)",
            next_offset, target_count
        );

        'pages: while delta.accepted < target_count {
            let page = self.node.box_id_range(next_offset, self.page_size).await?;

            if page.is_empty() {
                delta.exhausted = true;
                break;
            }

            let page_len = page.len();
            debug!("Processing page of {} ids at offset {}", page_len, next_offset);

            for box_id in page {
                next_offset += 1;

                if known.contains(&box_id) {
                    delta.skipped_known += 1;
                    continue;
                }

                let b = match self.node.box_by_id(&box_id).await {
                    Ok(Some(b)) => b,
                    Ok(None) => {
                        delta.skipped_spent += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to fetch box {}: {}", box_id, e);
                        delta.fetch_errors += 1;
                        continue;
                    }
                };

                if b.is_spent() {
                    delta.skipped_spent += 1;
                    continue;
                }

                let eligible_at = self.schedule.eligible_at_height(b.creation_height);
                if eligible_at > u64::from(current_height) + u64::from(self.look_ahead_blocks) {
                    // Too young even for the look-ahead window. Not tracked,
                    // so a later pass (after the cursor wraps) re-offers it.
                    delta.skipped_far_future += 1;
                    continue;
                }

                if !self.schedule.box_is_eligible_by_value(&b) {
                    debug!(
                        "Box {} value {} cannot cover rent for size {}",
                        b.box_id, b.value, b.size
                    );
                    delta.value_rejected.push(b);
                    continue;
                }

                delta.bucketed.entry(b.creation_height).or_default().push(b);
                delta.accepted += 1;

                if delta.accepted >= target_count {
                    break 'pages;
                }
            }

            if page_len < self.page_size {
                delta.exhausted = true;
                break;
            }
        }

        // Wrapping on exhaustion is what eventually re-offers boxes that
        // were dropped as too far in the future.
        let next_cursor = ScanCursor {
            offset: if delta.exhausted { 0 } else { next_offset },
            last_scan_height: current_height,
        };

        info!(
            "Scan pass done: {} accepted, {} known, {} spent, {} too young, {} rejected on value, {} fetch errors",
            delta.accepted,
            delta.skipped_known,
            delta.skipped_spent,
            delta.skipped_far_future,
            delta.value_rejected.len(),
            delta.fetch_errors,
        );

        Ok((delta, next_cursor))
    }
}
