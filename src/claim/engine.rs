use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::claim::batch::{partition, BatchBuilder};
use crate::claim::submit::SubmissionMonitor;
use crate::config::{Config, FeePolicy};
use crate::error::{HarvestError, Result};
use crate::node::client::LedgerNode;
use crate::node::types::ChainBox;
use crate::rent::RentSchedule;
use crate::scan::queue::{EligibilityQueue, QueueStatus};
use crate::scan::scanner::{EligibilityScanner, ScanCursor};
use crate::storage::models::{BoxStatus, TrackedBox};
use crate::storage::Database;

/// Summary of one harvest cycle. A cycle always produces one of these;
/// failures are collected in `errors`, never thrown past this boundary.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub height: u32,
    pub processed_boxes: usize,
    pub successful_tx_count: usize,
    pub failed_tx_count: usize,
    pub total_rent_collected: u128,
    pub total_fees_paid: u128,
    pub transactions: Vec<SubmittedTx>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubmittedTx {
    pub tx_id: String,
    pub box_count: usize,
    pub rent: u128,
    pub fee: u128,
}

impl CycleResult {
    pub fn print_summary(&self) {
        println!("\n=== Harvest Cycle Summary ===");
        println!("Chain height:    {}", self.height);
        println!("Boxes processed: {}", self.processed_boxes);
        println!("Transactions:    {} submitted, {} failed", self.successful_tx_count, self.failed_tx_count);
        println!(
            "Rent collected:  {}",
            crate::utils::format_coins_plain(self.total_rent_collected)
        );
        println!(
            "Fees paid:       {}",
            crate::utils::format_coins_plain(self.total_fees_paid)
        );
        if !self.errors.is_empty() {
            println!("Errors:");
            for e in &self.errors {
                println!("  - {}", e);
            }
        }
        println!("=============================");
    }
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub accepted: usize,
    pub value_rejected: usize,
    pub skipped_far_future: usize,
    pub exhausted: bool,
    pub queued_total: usize,
}

/// Ties the scanner, queue, batch builder and submission monitor into one
/// periodic decision loop over persisted state.
///
/// Single-writer: cycles never overlap. The only in-memory state is the
/// eligibility queue, and that is rebuilt from persisted box statuses on
/// startup, so an interrupted cycle costs at most a bounded re-scan.
pub struct HarvestEngine<N: LedgerNode + 'static> {
    node: Arc<N>,
    signer: Arc<dyn crate::signer::Signer>,
    db: Database,
    db_path: String,
    queue: EligibilityQueue,
    cursor: ScanCursor,
    schedule: RentSchedule,
    config: Config,
    dry_run: bool,
    change_tree: Option<String>,
}

impl<N: LedgerNode + 'static> HarvestEngine<N> {
    pub fn new(
        node: Arc<N>,
        signer: Arc<dyn crate::signer::Signer>,
        config: Config,
        dry_run: bool,
    ) -> Result<Self> {
        let db = Database::new(&config.database.path)?;
        let cursor = db.load_cursor()?;
        let schedule = RentSchedule::new(
            config.rent.fee_per_byte,
            config.rent.min_value_per_byte,
            config.rent.min_age_blocks,
        );

        let mut engine = Self {
            node,
            signer,
            db_path: config.database.path.clone(),
            db,
            queue: EligibilityQueue::new(),
            cursor,
            schedule,
            dry_run: dry_run || config.claim.dry_run,
            config,
            change_tree: None,
        };
        engine.rebuild_queue()?;
        Ok(engine)
    }

    /// Reload the in-memory height buckets from persisted statuses. Queued
    /// and claimable boxes both go back into buckets; the claimable ones
    /// simply promote again on the next cycle.
    fn rebuild_queue(&mut self) -> Result<()> {
        let mut restored = 0;
        for status in [BoxStatus::Queued, BoxStatus::Claimable] {
            for tracked in self.db.boxes_by_status(status)? {
                if self.queue.insert(tracked.chain_box) {
                    restored += 1;
                }
            }
        }
        if restored > 0 {
            info!("Restored {} box(es) into the eligibility queue", restored);
        }
        Ok(())
    }

    pub fn status(&self) -> QueueStatus {
        self.queue.status(self.config.rent.min_age_blocks)
    }

    pub fn cursor(&self) -> ScanCursor {
        self.cursor
    }

    /// One scan pass: walk the index from the cursor, persist what it found
    /// and merge it into the queue. The cursor only advances when the pass
    /// succeeds, so a failed pass is a safe no-op.
    pub async fn scan_once(&mut self, current_height: u32) -> Result<ScanSummary> {
        let mut known = self.db.tracked_ids()?;
        for id in self.queue.queued_ids() {
            known.insert(id.clone());
        }

        let scanner = EligibilityScanner::new(
            self.node.as_ref(),
            self.schedule,
            self.config.scan.page_size,
            self.config.scan.look_ahead_blocks,
        );
        let (delta, next_cursor) = scanner
            .scan(current_height, &self.cursor, self.config.scan.target_count, &known)
            .await?;

        let mut summary = ScanSummary {
            value_rejected: delta.value_rejected.len(),
            skipped_far_future: delta.skipped_far_future,
            exhausted: delta.exhausted,
            ..Default::default()
        };

        for b in delta.value_rejected {
            let rent_fee = self.schedule.box_rent_fee(&b);
            let reason = HarvestError::InsufficientValue(b.box_id.clone()).to_string();
            self.db
                .upsert_box(&TrackedBox::new(b, rent_fee, BoxStatus::Error).with_reason(&reason))?;
        }

        for boxes in delta.bucketed.into_values() {
            for b in boxes {
                let rent_fee = self.schedule.box_rent_fee(&b);
                let tracked = TrackedBox::new(b.clone(), rent_fee, BoxStatus::Queued);
                if self.queue.insert(b) {
                    self.db.upsert_box(&tracked)?;
                    summary.accepted += 1;
                }
            }
        }

        self.cursor = next_cursor;
        self.db.save_cursor(&self.cursor)?;

        summary.queued_total = self.queue.queued_count();
        Ok(summary)
    }

    /// Run one full cycle: scan if due, promote, claim, submit.
    pub async fn run_cycle(&mut self) -> CycleResult {
        let mut result = CycleResult::default();

        let current_height = match self.node.current_height().await {
            Ok(h) => h,
            Err(e) => {
                warn!("Could not fetch chain height: {}", e);
                result.errors.push(format!("height fetch failed: {}", e));
                return result;
            }
        };
        result.height = current_height;

        if current_height.saturating_sub(self.cursor.last_scan_height)
            >= self.config.scan.rescan_interval_blocks
        {
            match self.scan_once(current_height).await {
                Ok(summary) => info!(
                    "Scan pass queued {} box(es) ({} queued total)",
                    summary.accepted, summary.queued_total
                ),
                Err(e) => {
                    // Cursor untouched; next cycle retries the same page.
                    warn!("Scan pass aborted: {}", e);
                    result.errors.push(format!("scan aborted: {}", e));
                }
            }
        } else {
            debug!(
                "Scan not due: height {} vs last scan at {}",
                current_height, self.cursor.last_scan_height
            );
        }

        let promo = self
            .queue
            .promote(current_height, self.config.rent.min_age_blocks);

        if promo.claimable.is_empty() {
            let status = self.status();
            match status.next_eligible_height {
                Some(next) => info!(
                    "No claimable boxes at height {}; {} box(es) become eligible at height {}",
                    current_height, status.next_eligible_box_ids.len(), next
                ),
                None => info!("No claimable boxes and nothing queued at height {}", current_height),
            }
            self.refresh_wallet_balance().await;
            return result;
        }

        info!(
            "{} box(es) promoted to claimable at height {}",
            promo.claimable.len(),
            current_height
        );
        for b in &promo.claimable {
            if let Err(e) = self
                .db
                .update_box_status(&b.box_id, BoxStatus::Claimable, None)
            {
                warn!("Failed to persist claimable status for {}: {}", b.box_id, e);
            }
        }

        self.claim_all(promo.claimable, current_height, &mut result).await;

        self.refresh_wallet_balance().await;
        result
    }

    /// Build and submit one batch per chunk, sequentially, with a fixed
    /// delay between batches so the node is never saturated.
    async fn claim_all(
        &mut self,
        claimable: Vec<ChainBox>,
        current_height: u32,
        result: &mut CycleResult,
    ) {
        let change_tree = match self.change_tree().await {
            Ok(tree) => tree,
            Err(e) => {
                warn!("Could not resolve the change address script: {}", e);
                result
                    .errors
                    .push(format!("change address resolution failed: {}", e));
                self.requeue(claimable);
                return;
            }
        };

        let node = Arc::clone(&self.node);
        let builder = BatchBuilder::new(
            node.as_ref(),
            self.schedule,
            self.config.claim.fee_policy,
            self.config.claim.network_fee,
            self.config.wallet.change_address.clone(),
            change_tree,
        );
        let submitter = SubmissionMonitor::new(
            Arc::clone(&self.node),
            &self.db_path,
            Duration::from_secs(self.config.monitor.poll_interval_secs),
            self.config.monitor.max_attempts,
        );
        let batch_delay = Duration::from_secs(self.config.claim.batch_delay_secs);

        let batches = partition(claimable, self.config.claim.max_batch_size);
        for (i, mut chunk) in batches.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(batch_delay).await;
            }

            let batch = loop {
                match builder.build(chunk.clone(), current_height).await {
                    Ok(batch) => break Some(batch),
                    Err(HarvestError::BoxNotFound(id)) => {
                        // Spent by someone else between eligibility and
                        // build: exclude it and rebuild, never include it
                        // silently.
                        warn!("Box {} vanished before batching; rebuilding without it", id);
                        if let Err(e) =
                            self.db
                                .update_box_status(&id, BoxStatus::Error, Some("spent before claim"))
                        {
                            warn!("Failed to record spent box {}: {}", id, e);
                        }
                        chunk.retain(|b| b.box_id != id);
                        if chunk.is_empty() {
                            break None;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        result.errors.push(format!("batch build failed: {}", e));
                        self.requeue(chunk);
                        break None;
                    }
                    Err(e) => {
                        // InsufficientRent / InsufficientFunds / invariant:
                        // the whole batch is in error, boxes kept for manual
                        // reconsideration.
                        warn!("Batch cannot be claimed: {}", e);
                        result.errors.push(format!("batch failed: {}", e));
                        result.failed_tx_count += 1;
                        for b in &chunk {
                            if let Err(db_err) = self.db.update_box_status(
                                &b.box_id,
                                BoxStatus::Error,
                                Some(&e.to_string()),
                            ) {
                                warn!("Failed to record batch error for {}: {}", b.box_id, db_err);
                            }
                        }
                        break None;
                    }
                }
            };

            let Some(batch) = batch else { continue };
            result.processed_boxes += batch.boxes.len();

            if self.dry_run {
                info!(
                    "DRY RUN: would claim {} box(es) for {} rent",
                    batch.boxes.len(),
                    batch.total_rent_collected
                );
                // Statuses stay claimable and the boxes return to the queue
                // so repeated dry cycles keep reporting them.
                self.requeue(batch.boxes);
                continue;
            }

            for b in &batch.boxes {
                if let Err(e) = self
                    .db
                    .update_box_status(&b.box_id, BoxStatus::Batched, None)
                {
                    warn!("Failed to persist batched status for {}: {}", b.box_id, e);
                }
            }

            match submitter
                .submit(&self.db, self.signer.as_ref(), &batch)
                .await
            {
                Ok(tx_id) => {
                    result.successful_tx_count += 1;
                    result.total_rent_collected += batch.total_rent_collected;
                    result.total_fees_paid += batch.fee_paid;
                    result.transactions.push(SubmittedTx {
                        tx_id: tx_id.clone(),
                        box_count: batch.boxes.len(),
                        rent: batch.total_rent_collected,
                        fee: batch.fee_paid,
                    });
                    submitter.spawn_monitor(tx_id);
                }
                Err(e) => {
                    // submit already moved the boxes to error status
                    result.failed_tx_count += 1;
                    result.errors.push(format!("submission failed: {}", e));
                }
            }
        }
    }

    fn requeue(&mut self, boxes: Vec<ChainBox>) {
        for b in boxes {
            self.queue.insert(b);
        }
    }

    async fn change_tree(&mut self) -> Result<String> {
        if let Some(tree) = &self.change_tree {
            return Ok(tree.clone());
        }
        let tree = self
            .node
            .address_to_tree(&self.config.wallet.change_address)
            .await?;
        self.change_tree = Some(tree.clone());
        Ok(tree)
    }

    /// Cache the spendable wallet total so shortfall reporting does not need
    /// an extra round trip. Only meaningful under the wallet-utxos policy.
    async fn refresh_wallet_balance(&self) {
        if self.config.claim.fee_policy != FeePolicy::WalletUtxos {
            return;
        }
        match self
            .node
            .spendable_boxes(&self.config.wallet.change_address)
            .await
        {
            Ok(boxes) => {
                let total: u128 = boxes.iter().map(|b| u128::from(b.value)).sum();
                if let Err(e) = self.db.save_wallet_balance(total) {
                    warn!("Failed to cache wallet balance: {}", e);
                }
            }
            Err(e) => debug!("Wallet balance refresh failed: {}", e),
        }
    }
}
