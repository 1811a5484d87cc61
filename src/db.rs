use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

/// History store for applied fee adjustments and rebalance outcomes. The
/// decision core never reads it; it backs the `status` command.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // Enable WAL mode for crash safety
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn record_fee_adjustment(
        &self,
        channel_id: u64,
        old_base_msat: u64,
        new_base_msat: u64,
        old_fee_rate: f64,
        new_fee_rate: f64,
        clamped: bool,
        applied_at: i64,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO fee_history (channel_id, old_base_msat, new_base_msat, \
             old_fee_rate, new_fee_rate, clamped, applied_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                channel_id as i64,
                old_base_msat as i64,
                new_base_msat as i64,
                old_fee_rate,
                new_fee_rate,
                clamped as i64,
                applied_at,
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_rebalance(
        &self,
        source_channel: u64,
        target_channel: u64,
        amount_moved_sat: u64,
        fee_paid_msat: u64,
        attempts: u32,
        status: &str,
        hops_json: &str,
        finished_at: i64,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO rebalance_log (source_channel, target_channel, amount_moved_sat, \
             fee_paid_msat, attempts, status, hops, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                source_channel as i64,
                target_channel as i64,
                amount_moved_sat as i64,
                fee_paid_msat as i64,
                attempts as i64,
                status,
                hops_json,
                finished_at,
            ],
        )?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
-- One row per applied fee adjustment
CREATE TABLE IF NOT EXISTS fee_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL,
    old_base_msat INTEGER NOT NULL,
    new_base_msat INTEGER NOT NULL,
    old_fee_rate REAL NOT NULL,
    new_fee_rate REAL NOT NULL,
    clamped INTEGER NOT NULL DEFAULT 0,
    applied_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fee_history_channel
    ON fee_history(channel_id, applied_at);

-- One row per rebalance run
CREATE TABLE IF NOT EXISTS rebalance_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_channel INTEGER NOT NULL,
    target_channel INTEGER NOT NULL,
    amount_moved_sat INTEGER NOT NULL,
    fee_paid_msat INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    status TEXT NOT NULL,
    hops TEXT NOT NULL,
    finished_at INTEGER NOT NULL
);
"#;
