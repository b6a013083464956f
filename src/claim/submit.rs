use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::claim::batch::ClaimBatch;
use crate::error::Result;
use crate::node::client::LedgerNode;
use crate::signer::Signer;
use crate::storage::models::{BoxStatus, TxRecord, TxStatus};
use crate::storage::Database;

/// Outcome of one bounded confirmation-polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed { attempts: u32 },
    /// Attempts exhausted without a confirmation. A give-up, not a proof of
    /// failure: the transaction may still land, it just stops being tracked.
    GaveUp { attempts: u32 },
}

/// Poll the node for a transaction's confirmation, sleeping `interval`
/// before each attempt. Stops at the first confirmed observation.
pub async fn poll_confirmations<N: LedgerNode>(
    node: &N,
    tx_id: &str,
    interval: Duration,
    max_attempts: u32,
) -> PollOutcome {
    for attempt in 1..=max_attempts {
        tokio::time::sleep(interval).await;

        match node.tx_confirmations(tx_id).await {
            Ok(Some(confirmations)) if confirmations >= 1 => {
                info!(
                    "Transaction {} confirmed after {} poll(s)",
                    tx_id, attempt
                );
                return PollOutcome::Confirmed { attempts: attempt };
            }
            Ok(_) => {
                debug!(
                    "Transaction {} not confirmed yet (attempt {}/{})",
                    tx_id, attempt, max_attempts
                );
            }
            Err(e) => {
                // Transient: the attempt is spent, the loop goes on.
                warn!("Confirmation poll for {} failed: {}", tx_id, e);
            }
        }
    }

    PollOutcome::GaveUp {
        attempts: max_attempts,
    }
}

/// Hands signed claim transactions to the chain and tracks them to a
/// terminal status.
pub struct SubmissionMonitor<N> {
    node: Arc<N>,
    db_path: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl<N: LedgerNode + 'static> SubmissionMonitor<N> {
    pub fn new(node: Arc<N>, db_path: &str, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            node,
            db_path: db_path.to_string(),
            poll_interval,
            max_attempts,
        }
    }

    /// Sign and broadcast one batch. On success the transaction is recorded
    /// as `Pending` and every batch box moves to `Submitted`. On failure the
    /// boxes move to `Error` (no automatic retry) and the error surfaces.
    pub async fn submit(
        &self,
        db: &Database,
        signer: &dyn Signer,
        batch: &ClaimBatch,
    ) -> Result<String> {
        let box_ids: Vec<String> = batch.boxes.iter().map(|b| b.box_id.clone()).collect();

        let signed = match signer.sign(&batch.unsigned_tx).await {
            Ok(tx) => tx,
            Err(e) => {
                mark_boxes_error(db, &box_ids, &format!("signing failed: {}", e));
                return Err(e);
            }
        };

        let tx_id = match self.node.broadcast(&signed).await {
            Ok(id) => id,
            Err(e) => {
                mark_boxes_error(db, &box_ids, &format!("broadcast failed: {}", e));
                return Err(e);
            }
        };

        db.save_transaction(&TxRecord {
            tx_id: tx_id.clone(),
            box_ids: box_ids.clone(),
            total_rent: batch.total_rent_collected,
            fee: batch.fee_paid,
            status: TxStatus::Pending,
            created_at: Utc::now(),
        })?;
        db.attach_tx(&box_ids, &tx_id, BoxStatus::Submitted)?;

        info!(
            "Submitted claim transaction {} ({} box(es), rent {})",
            tx_id,
            box_ids.len(),
            batch.total_rent_collected
        );

        Ok(tx_id)
    }

    /// Track a submitted transaction to a terminal status in a detached
    /// task. The task opens its own database handle and never touches the
    /// eligibility queue, so it is free to outlive the cycle that spawned
    /// it. Failures are logged, not propagated.
    pub fn spawn_monitor(&self, tx_id: String) -> tokio::task::JoinHandle<()> {
        let node = Arc::clone(&self.node);
        let db_path = self.db_path.clone();
        let interval = self.poll_interval;
        let max_attempts = self.max_attempts;

        tokio::spawn(async move {
            let outcome = poll_confirmations(node.as_ref(), &tx_id, interval, max_attempts).await;

            let db = match Database::new(&db_path) {
                Ok(db) => db,
                Err(e) => {
                    error!("Monitor for {} cannot open database: {}", tx_id, e);
                    return;
                }
            };

            let result = match outcome {
                PollOutcome::Confirmed { .. } => db
                    .update_tx_status(&tx_id, TxStatus::Confirmed)
                    .and_then(|_| db.set_status_for_tx_boxes(&tx_id, BoxStatus::Confirmed, None)),
                PollOutcome::GaveUp { attempts } => {
                    warn!(
                        "Giving up on transaction {} after {} poll(s); it may still confirm later",
                        tx_id, attempts
                    );
                    db.update_tx_status(&tx_id, TxStatus::Failed).and_then(|_| {
                        db.set_status_for_tx_boxes(
                            &tx_id,
                            BoxStatus::Error,
                            Some("confirmation timeout"),
                        )
                    })
                }
            };

            if let Err(e) = result {
                error!("Monitor for {} failed to record outcome: {}", tx_id, e);
            }
        })
    }
}

fn mark_boxes_error(db: &Database, box_ids: &[String], reason: &str) {
    for box_id in box_ids {
        if let Err(e) = db.update_box_status(box_id, BoxStatus::Error, Some(reason)) {
            warn!("Failed to record error status for box {}: {}", box_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::types::{ChainBox, SignedClaimTx, UnsignedClaimTx};
    use crate::node::MockLedgerNode;
    use crate::signer::MockSigner;
    use crate::storage::models::TrackedBox;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn chain_box(id: &str) -> ChainBox {
        ChainBox {
            box_id: id.to_string(),
            value: 500_000_000,
            ergo_tree: "0008cd02deadbeef".to_string(),
            assets: vec![],
            creation_height: 1000,
            additional_registers: Default::default(),
            size: 105,
            spent_transaction_id: None,
        }
    }

    fn test_batch() -> ClaimBatch {
        ClaimBatch {
            boxes: vec![chain_box("a"), chain_box("b")],
            unsigned_tx: UnsignedClaimTx {
                inputs: vec![],
                data_inputs: vec![],
                outputs: vec![],
            },
            total_rent_collected: 150_000_000,
            fee_paid: 1_000_000,
        }
    }

    fn empty_signed() -> SignedClaimTx {
        SignedClaimTx {
            inputs: vec![],
            data_inputs: vec![],
            outputs: vec![],
        }
    }

    fn temp_db() -> (tempfile::TempDir, String, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db").to_str().unwrap().to_string();
        let db = Database::new(&path).unwrap();
        (dir, path, db)
    }

    fn seed_boxes(db: &Database) {
        for id in ["a", "b"] {
            db.upsert_box(&TrackedBox::new(chain_box(id), 1, BoxStatus::Batched))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_records_and_marks_boxes() {
        let (_dir, path, db) = temp_db();
        seed_boxes(&db);

        let mut node = MockLedgerNode::new();
        node.expect_broadcast().returning(|_| Ok("tx1".to_string()));
        let mut signer = MockSigner::new();
        signer.expect_sign().returning(|_| Ok(empty_signed()));

        let monitor =
            SubmissionMonitor::new(Arc::new(node), &path, Duration::from_millis(0), 3);
        let tx_id = monitor.submit(&db, &signer, &test_batch()).await.unwrap();
        assert_eq!(tx_id, "tx1");

        let record = db.get_transaction("tx1").unwrap().unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.box_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(record.total_rent, 150_000_000);

        for id in ["a", "b"] {
            let b = db.get_box(id).unwrap().unwrap();
            assert_eq!(b.status, BoxStatus::Submitted);
            assert_eq!(b.tx_id.as_deref(), Some("tx1"));
        }
    }

    #[tokio::test]
    async fn test_submit_broadcast_failure_reverts_boxes() {
        let (_dir, path, db) = temp_db();
        seed_boxes(&db);

        let mut node = MockLedgerNode::new();
        node.expect_broadcast()
            .returning(|_| Err(crate::error::HarvestError::Rejected("double spend".into())));
        let mut signer = MockSigner::new();
        signer.expect_sign().returning(|_| Ok(empty_signed()));

        let monitor =
            SubmissionMonitor::new(Arc::new(node), &path, Duration::from_millis(0), 3);
        let result = monitor.submit(&db, &signer, &test_batch()).await;
        assert!(result.is_err());

        assert!(db.get_transaction("tx1").unwrap().is_none());
        for id in ["a", "b"] {
            let b = db.get_box(id).unwrap().unwrap();
            assert_eq!(b.status, BoxStatus::Error);
        }
    }

    #[tokio::test]
    async fn test_poll_stops_at_first_confirmation() {
        let calls = AtomicU32::new(0);
        let mut node = MockLedgerNode::new();
        node.expect_tx_confirmations().returning(move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n >= 3 { Some(1) } else { None })
        });

        let outcome =
            poll_confirmations(&node, "tx1", Duration::from_millis(0), 20).await;
        assert_eq!(outcome, PollOutcome::Confirmed { attempts: 3 });
    }

    #[tokio::test]
    async fn test_poll_gives_up_after_max_attempts() {
        let mut node = MockLedgerNode::new();
        node.expect_tx_confirmations()
            .times(5)
            .returning(|_| Ok(None));

        let outcome =
            poll_confirmations(&node, "tx1", Duration::from_millis(0), 5).await;
        assert_eq!(outcome, PollOutcome::GaveUp { attempts: 5 });
    }

    #[tokio::test]
    async fn test_poll_counts_transient_errors_as_attempts() {
        let mut node = MockLedgerNode::new();
        node.expect_tx_confirmations()
            .times(2)
            .returning(|_| Err(anyhow::anyhow!("timeout").into()));

        let outcome =
            poll_confirmations(&node, "tx1", Duration::from_millis(0), 2).await;
        assert_eq!(outcome, PollOutcome::GaveUp { attempts: 2 });
    }

    #[tokio::test]
    async fn test_monitor_finalizes_confirmed_transaction() {
        let (_dir, path, db) = temp_db();
        seed_boxes(&db);
        db.save_transaction(&TxRecord {
            tx_id: "tx1".to_string(),
            box_ids: vec!["a".to_string(), "b".to_string()],
            total_rent: 150_000_000,
            fee: 1_000_000,
            status: TxStatus::Pending,
            created_at: Utc::now(),
        })
        .unwrap();
        db.attach_tx(
            &["a".to_string(), "b".to_string()],
            "tx1",
            BoxStatus::Submitted,
        )
        .unwrap();

        let mut node = MockLedgerNode::new();
        node.expect_tx_confirmations().returning(|_| Ok(Some(2)));

        let monitor =
            SubmissionMonitor::new(Arc::new(node), &path, Duration::from_millis(0), 3);
        monitor.spawn_monitor("tx1".to_string()).await.unwrap();

        assert_eq!(
            db.get_transaction("tx1").unwrap().unwrap().status,
            TxStatus::Confirmed
        );
        assert_eq!(
            db.get_box("a").unwrap().unwrap().status,
            BoxStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_monitor_marks_failed_on_exhaustion() {
        let (_dir, path, db) = temp_db();
        seed_boxes(&db);
        db.save_transaction(&TxRecord {
            tx_id: "tx1".to_string(),
            box_ids: vec!["a".to_string(), "b".to_string()],
            total_rent: 150_000_000,
            fee: 1_000_000,
            status: TxStatus::Pending,
            created_at: Utc::now(),
        })
        .unwrap();
        db.attach_tx(
            &["a".to_string(), "b".to_string()],
            "tx1",
            BoxStatus::Submitted,
        )
        .unwrap();

        let mut node = MockLedgerNode::new();
        node.expect_tx_confirmations().returning(|_| Ok(None));

        let monitor =
            SubmissionMonitor::new(Arc::new(node), &path, Duration::from_millis(0), 2);
        monitor.spawn_monitor("tx1".to_string()).await.unwrap();

        assert_eq!(
            db.get_transaction("tx1").unwrap().unwrap().status,
            TxStatus::Failed
        );
        let a = db.get_box("a").unwrap().unwrap();
        assert_eq!(a.status, BoxStatus::Error);
        assert_eq!(a.reason.as_deref(), Some("confirmation timeout"));
    }
}
