use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::node::types::ChainBox;
use crate::scan::scanner::ScanCursor;
use crate::storage::models::{BoxStatus, TrackedBox, TxRecord, TxStatus};

const STATE_SCAN_OFFSET: &str = "scan_offset";
const STATE_LAST_SCAN_HEIGHT: &str = "last_scan_height";
const STATE_WALLET_BALANCE: &str = "wallet_balance_nano";

pub struct Database {
    conn: Connection,
}

/// Monetary columns are stored as decimal TEXT so u128 totals round-trip
/// without truncation; SQLite integers stop at i64.
impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tracked_boxes (
                box_id TEXT PRIMARY KEY,
                creation_height INTEGER NOT NULL,
                encoded_size INTEGER NOT NULL,
                value TEXT NOT NULL,
                rent_fee TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                tx_id TEXT,
                box_json TEXT NOT NULL,
                discovered_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS claim_txs (
                tx_id TEXT PRIMARY KEY,
                box_ids TEXT NOT NULL,
                total_rent TEXT NOT NULL,
                fee TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS bot_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_box_status ON tracked_boxes(status)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_box_tx ON tracked_boxes(tx_id)",
            [],
        )?;

        Ok(())
    }

    // --- tracked boxes ---

    pub fn upsert_box(&self, tracked: &TrackedBox) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tracked_boxes
             (box_id, creation_height, encoded_size, value, rent_fee, status,
              reason, tx_id, box_json, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tracked.chain_box.box_id,
                tracked.chain_box.creation_height,
                tracked.chain_box.size,
                tracked.chain_box.value.to_string(),
                tracked.rent_fee.to_string(),
                tracked.status.to_string(),
                tracked.reason,
                tracked.tx_id,
                serde_json::to_string(&tracked.chain_box)?,
                tracked.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_box(&self, box_id: &str) -> Result<Option<TrackedBox>> {
        let mut stmt = self.conn.prepare(
            "SELECT rent_fee, status, reason, tx_id, box_json, discovered_at
             FROM tracked_boxes WHERE box_id = ?1",
        )?;

        let mut rows = stmt.query_map([box_id], row_to_tracked_box)?;
        Ok(rows.next().transpose()?)
    }

    pub fn boxes_by_status(&self, status: BoxStatus) -> Result<Vec<TrackedBox>> {
        let mut stmt = self.conn.prepare(
            "SELECT rent_fee, status, reason, tx_id, box_json, discovered_at
             FROM tracked_boxes WHERE status = ?1
             ORDER BY creation_height ASC, discovered_at ASC",
        )?;

        let boxes = stmt
            .query_map([status.to_string()], row_to_tracked_box)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(boxes)
    }

    /// Every id the bot has ever tracked, regardless of status. The scanner
    /// skips these before fetching box data.
    pub fn tracked_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT box_id FROM tracked_boxes")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn update_box_status(
        &self,
        box_id: &str,
        status: BoxStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE tracked_boxes
             SET status = ?1, reason = COALESCE(?2, reason)
             WHERE box_id = ?3",
            params![status.to_string(), reason, box_id],
        )?;
        Ok(())
    }

    /// Bind a set of boxes to a transaction and move them to `status` in one
    /// statement batch.
    pub fn attach_tx(&self, box_ids: &[String], tx_id: &str, status: BoxStatus) -> Result<()> {
        for box_id in box_ids {
            self.conn.execute(
                "UPDATE tracked_boxes SET status = ?1, tx_id = ?2 WHERE box_id = ?3",
                params![status.to_string(), tx_id, box_id],
            )?;
        }
        Ok(())
    }

    /// Finalize every box bound to a transaction, used by confirmation
    /// monitors once the transaction reaches a terminal status.
    pub fn set_status_for_tx_boxes(
        &self,
        tx_id: &str,
        status: BoxStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE tracked_boxes
             SET status = ?1, reason = COALESCE(?2, reason)
             WHERE tx_id = ?3",
            params![status.to_string(), reason, tx_id],
        )?;
        Ok(())
    }

    pub fn count_by_status(&self, status: BoxStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracked_boxes WHERE status = ?1",
            [status.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // --- claim transactions ---

    pub fn save_transaction(&self, record: &TxRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO claim_txs (tx_id, box_ids, total_rent, fee, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.tx_id,
                serde_json::to_string(&record.box_ids)?,
                record.total_rent.to_string(),
                record.fee.to_string(),
                record.status.to_string(),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_tx_status(&self, tx_id: &str, status: TxStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE claim_txs SET status = ?1 WHERE tx_id = ?2",
            params![status.to_string(), tx_id],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, tx_id: &str) -> Result<Option<TxRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_id, box_ids, total_rent, fee, status, created_at
             FROM claim_txs WHERE tx_id = ?1",
        )?;

        let mut rows = stmt.query_map([tx_id], row_to_tx_record)?;
        Ok(rows.next().transpose()?)
    }

    pub fn recent_transactions(&self, limit: usize) -> Result<Vec<TxRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_id, box_ids, total_rent, fee, status, created_at
             FROM claim_txs ORDER BY created_at DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit as i64], row_to_tx_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // --- bot state ---

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM bot_state WHERE key = ?1")?;
        let mut rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bot_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn load_cursor(&self) -> Result<ScanCursor> {
        let offset = self
            .get_state(STATE_SCAN_OFFSET)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_scan_height = self
            .get_state(STATE_LAST_SCAN_HEIGHT)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(ScanCursor {
            offset,
            last_scan_height,
        })
    }

    pub fn save_cursor(&self, cursor: &ScanCursor) -> Result<()> {
        self.set_state(STATE_SCAN_OFFSET, &cursor.offset.to_string())?;
        self.set_state(STATE_LAST_SCAN_HEIGHT, &cursor.last_scan_height.to_string())?;
        Ok(())
    }

    pub fn reset_cursor(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM bot_state WHERE key IN (?1, ?2)",
            params![STATE_SCAN_OFFSET, STATE_LAST_SCAN_HEIGHT],
        )?;
        Ok(())
    }

    pub fn save_wallet_balance(&self, nanos: u128) -> Result<()> {
        self.set_state(STATE_WALLET_BALANCE, &nanos.to_string())
    }

    pub fn wallet_balance(&self) -> Result<Option<u128>> {
        Ok(self
            .get_state(STATE_WALLET_BALANCE)?
            .and_then(|v| v.parse().ok()))
    }

    // --- reporting ---

    pub fn stats(&self) -> Result<HarvestStats> {
        let mut stats = HarvestStats {
            queued_boxes: self.count_by_status(BoxStatus::Queued)?,
            claimable_boxes: self.count_by_status(BoxStatus::Claimable)?,
            in_flight_boxes: self.count_by_status(BoxStatus::Batched)?
                + self.count_by_status(BoxStatus::Submitted)?,
            confirmed_boxes: self.count_by_status(BoxStatus::Confirmed)?,
            error_boxes: self.count_by_status(BoxStatus::Error)?,
            wallet_balance: self.wallet_balance()?,
            ..Default::default()
        };

        let mut stmt = self
            .conn
            .prepare("SELECT total_rent, fee, status FROM claim_txs")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        for row in rows {
            let (rent, fee, status) = row?;
            stats.total_txs += 1;
            match TxStatus::from_str(&status) {
                Ok(TxStatus::Pending) => stats.pending_txs += 1,
                Ok(TxStatus::Failed) => stats.failed_txs += 1,
                Ok(TxStatus::Confirmed) => {
                    stats.confirmed_txs += 1;
                    stats.total_rent_collected += rent.parse::<u128>().unwrap_or(0);
                    stats.total_fees_paid += fee.parse::<u128>().unwrap_or(0);
                }
                Err(_) => {}
            }
        }

        Ok(stats)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarvestStats {
    pub queued_boxes: usize,
    pub claimable_boxes: usize,
    pub in_flight_boxes: usize,
    pub confirmed_boxes: usize,
    pub error_boxes: usize,
    pub total_txs: usize,
    pub pending_txs: usize,
    pub confirmed_txs: usize,
    pub failed_txs: usize,
    pub total_rent_collected: u128,
    pub total_fees_paid: u128,
    pub wallet_balance: Option<u128>,
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn row_to_tracked_box(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedBox> {
    let rent_fee: String = row.get(0)?;
    let status: String = row.get(1)?;
    let box_json: String = row.get(4)?;

    let chain_box: ChainBox =
        serde_json::from_str(&box_json).map_err(|e| conversion_err(4, e))?;

    Ok(TrackedBox {
        chain_box,
        rent_fee: rent_fee.parse().map_err(|e| conversion_err(0, e))?,
        status: BoxStatus::from_str(&status)
            .unwrap_or(BoxStatus::Error),
        reason: row.get(2)?,
        tx_id: row.get(3)?,
        discovered_at: parse_timestamp(5, row.get::<_, String>(5)?)?,
    })
}

fn row_to_tx_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TxRecord> {
    let box_ids: String = row.get(1)?;
    let total_rent: String = row.get(2)?;
    let fee: String = row.get(3)?;
    let status: String = row.get(4)?;

    Ok(TxRecord {
        tx_id: row.get(0)?,
        box_ids: serde_json::from_str(&box_ids).map_err(|e| conversion_err(1, e))?,
        total_rent: total_rent.parse().map_err(|e| conversion_err(2, e))?,
        fee: fee.parse().map_err(|e| conversion_err(3, e))?,
        status: TxStatus::from_str(&status).unwrap_or(TxStatus::Failed),
        created_at: parse_timestamp(5, row.get::<_, String>(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::TrackedBox;

    fn temp_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        (dir, db)
    }

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

    #[test]
    fn test_box_round_trip() {
        let (_dir, db) = temp_db();
        let tracked = TrackedBox::new(chain_box("a"), 131_250_000, BoxStatus::Queued);
        db.upsert_box(&tracked).unwrap();

        let loaded = db.get_box("a").unwrap().unwrap();
        assert_eq!(loaded.chain_box, tracked.chain_box);
        assert_eq!(loaded.rent_fee, 131_250_000);
        assert_eq!(loaded.status, BoxStatus::Queued);
        assert!(loaded.tx_id.is_none());
    }

    #[test]
    fn test_status_transitions_and_queries() {
        let (_dir, db) = temp_db();
        db.upsert_box(&TrackedBox::new(chain_box("a"), 1, BoxStatus::Queued))
            .unwrap();
        db.upsert_box(&TrackedBox::new(chain_box("b"), 1, BoxStatus::Queued))
            .unwrap();

        db.update_box_status("a", BoxStatus::Claimable, None).unwrap();
        assert_eq!(db.boxes_by_status(BoxStatus::Claimable).unwrap().len(), 1);
        assert_eq!(db.boxes_by_status(BoxStatus::Queued).unwrap().len(), 1);

        db.attach_tx(&["a".to_string()], "tx1", BoxStatus::Submitted)
            .unwrap();
        let a = db.get_box("a").unwrap().unwrap();
        assert_eq!(a.status, BoxStatus::Submitted);
        assert_eq!(a.tx_id.as_deref(), Some("tx1"));

        db.set_status_for_tx_boxes("tx1", BoxStatus::Confirmed, None)
            .unwrap();
        assert_eq!(
            db.get_box("a").unwrap().unwrap().status,
            BoxStatus::Confirmed
        );
        // "b" never touched
        assert_eq!(db.get_box("b").unwrap().unwrap().status, BoxStatus::Queued);
    }

    #[test]
    fn test_tracked_ids() {
        let (_dir, db) = temp_db();
        db.upsert_box(&TrackedBox::new(chain_box("a"), 1, BoxStatus::Error))
            .unwrap();
        db.upsert_box(&TrackedBox::new(chain_box("b"), 1, BoxStatus::Queued))
            .unwrap();

        let ids = db.tracked_ids().unwrap();
        assert!(ids.contains("a") && ids.contains("b"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_transaction_round_trip_and_stats() {
        let (_dir, db) = temp_db();

        let record = TxRecord {
            tx_id: "tx1".to_string(),
            box_ids: vec!["a".to_string(), "b".to_string()],
            total_rent: 150_000_000,
            fee: 1_000_000,
            status: TxStatus::Pending,
            created_at: Utc::now(),
        };
        db.save_transaction(&record).unwrap();

        let loaded = db.get_transaction("tx1").unwrap().unwrap();
        assert_eq!(loaded.box_ids, record.box_ids);
        assert_eq!(loaded.total_rent, 150_000_000);
        assert_eq!(loaded.status, TxStatus::Pending);

        db.update_tx_status("tx1", TxStatus::Confirmed).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_txs, 1);
        assert_eq!(stats.confirmed_txs, 1);
        assert_eq!(stats.total_rent_collected, 150_000_000);
        assert_eq!(stats.total_fees_paid, 1_000_000);
    }

    #[test]
    fn test_large_amounts_survive_round_trip() {
        let (_dir, db) = temp_db();

        let record = TxRecord {
            tx_id: "big".to_string(),
            box_ids: vec![],
            total_rent: u128::from(u64::MAX) * 3,
            fee: 1,
            status: TxStatus::Confirmed,
            created_at: Utc::now(),
        };
        db.save_transaction(&record).unwrap();

        let loaded = db.get_transaction("big").unwrap().unwrap();
        assert_eq!(loaded.total_rent, u128::from(u64::MAX) * 3);
    }

    #[test]
    fn test_cursor_persistence() {
        let (_dir, db) = temp_db();

        assert_eq!(db.load_cursor().unwrap(), ScanCursor::default());

        let cursor = ScanCursor {
            offset: 12345,
            last_scan_height: 1600,
        };
        db.save_cursor(&cursor).unwrap();
        assert_eq!(db.load_cursor().unwrap(), cursor);

        db.reset_cursor().unwrap();
        assert_eq!(db.load_cursor().unwrap(), ScanCursor::default());
    }

    #[test]
    fn test_wallet_balance_cache() {
        let (_dir, db) = temp_db();
        assert_eq!(db.wallet_balance().unwrap(), None);
        db.save_wallet_balance(42_000_000_000).unwrap();
        assert_eq!(db.wallet_balance().unwrap(), Some(42_000_000_000));
    }
}
