use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};

use super::{SwapRecord, SwapStatus, now_unix};

const SWAP_COLUMNS: &str = r#"
  swap_id,
  status,
  created_at,
  updated_at,
  preimage_hash,
  claim_public_key,
  claim_address,
  invoice_amount_sat,
  invoice,
  invoice_paid,
  lockup_address,
  lockup_txid,
  lockup_amount_sat,
  timeout_block_height,
  claim_txid,
  claimed_at,
  preimage
"#;

/// Sole source of truth for swap state, one row per swap.
#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_swap(&mut self, record: &SwapRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO swaps (
  swap_id,
  status,
  created_at,
  updated_at,
  preimage_hash,
  claim_public_key,
  claim_address,
  invoice_amount_sat,
  invoice,
  invoice_paid,
  lockup_address,
  lockup_txid,
  lockup_amount_sat,
  timeout_block_height,
  claim_txid,
  claimed_at,
  preimage
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
)
"#,
                params![
                    &record.swap_id,
                    status_to_str(record.status),
                    record.created_at,
                    record.updated_at,
                    &record.preimage_hash,
                    &record.claim_public_key,
                    &record.claim_address,
                    record.invoice_amount_sat,
                    &record.invoice,
                    record.invoice_paid,
                    &record.lockup_address,
                    &record.lockup_txid,
                    record.lockup_amount_sat,
                    record.timeout_block_height,
                    &record.claim_txid,
                    record.claimed_at,
                    &record.preimage,
                ],
            )
            .with_context(|| format!("insert swap {}", record.swap_id))?;
        Ok(())
    }

    pub fn get_swap(&self, swap_id: &str) -> Result<Option<SwapRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE swap_id = ?1"),
                params![swap_id],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("get swap {swap_id}"))
    }

    pub fn get_swap_by_preimage_hash(&self, preimage_hash: &str) -> Result<Option<SwapRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {SWAP_COLUMNS} FROM swaps WHERE preimage_hash = ?1"),
                params![preimage_hash],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("get swap by preimage hash {preimage_hash}"))
    }

    /// All swaps, newest first.
    pub fn list_swaps(&self) -> Result<Vec<SwapRecord>> {
        self.query_swaps(
            &format!("SELECT {SWAP_COLUMNS} FROM swaps ORDER BY created_at DESC, rowid DESC"),
            params![],
        )
    }

    pub fn list_swaps_by_status(&self, status: SwapStatus) -> Result<Vec<SwapRecord>> {
        self.query_swaps(
            &format!(
                "SELECT {SWAP_COLUMNS} FROM swaps WHERE status = ?1 ORDER BY created_at DESC, rowid DESC"
            ),
            params![status_to_str(status)],
        )
    }

    pub fn update_status(&mut self, swap_id: &str, status: SwapStatus) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET status = ?2, updated_at = ?3 WHERE swap_id = ?1",
                params![swap_id, status_to_str(status), now_unix()],
            )
            .with_context(|| format!("update swap status {swap_id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {swap_id}");
        Ok(())
    }

    pub fn set_invoice_paid(&mut self, swap_id: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE swaps SET status = ?2, invoice_paid = 1, updated_at = ?3 WHERE swap_id = ?1",
                params![swap_id, status_to_str(SwapStatus::InvoicePaid), now_unix()],
            )
            .with_context(|| format!("set swap invoice paid {swap_id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {swap_id}");
        Ok(())
    }

    pub fn set_locked(
        &mut self,
        swap_id: &str,
        lockup_txid: &str,
        lockup_amount_sat: u64,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                r#"
UPDATE swaps
SET status = ?2, lockup_txid = ?3, lockup_amount_sat = ?4, updated_at = ?5
WHERE swap_id = ?1
"#,
                params![
                    swap_id,
                    status_to_str(SwapStatus::Locked),
                    lockup_txid,
                    lockup_amount_sat,
                    now_unix(),
                ],
            )
            .with_context(|| format!("set swap locked {swap_id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {swap_id}");
        Ok(())
    }

    /// The only write that ever stores a preimage. By the time it runs the
    /// secret is already public in the claim transaction.
    pub fn set_claimed(
        &mut self,
        swap_id: &str,
        claim_txid: &str,
        claimed_at: i64,
        preimage_hex: &str,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                r#"
UPDATE swaps
SET status = ?2, claim_txid = ?3, claimed_at = ?4, preimage = ?5, updated_at = ?6
WHERE swap_id = ?1
"#,
                params![
                    swap_id,
                    status_to_str(SwapStatus::Claimed),
                    claim_txid,
                    claimed_at,
                    preimage_hex,
                    now_unix(),
                ],
            )
            .with_context(|| format!("set swap claimed {swap_id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {swap_id}");
        Ok(())
    }

    fn query_swaps(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SwapRecord>> {
        let mut stmt = self.conn.prepare(sql).context("prepare swap query")?;
        let rows = stmt.query_map(params, row_to_record).context("query swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }
}

/// True when an error from a store mutation is a sqlite constraint failure,
/// such as the unique preimage-hash index rejecting a duplicate insert.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.root_cause()
        .downcast_ref::<rusqlite::Error>()
        .is_some_and(|e| {
            matches!(
                e,
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation
            )
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SwapRecord> {
    let status_str: String = row.get(1)?;
    Ok(SwapRecord {
        swap_id: row.get(0)?,
        status: status_from_str(&status_str, 1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        preimage_hash: row.get(4)?,
        claim_public_key: row.get(5)?,
        claim_address: row.get(6)?,
        invoice_amount_sat: u64_col(row, 7)?,
        invoice: row.get(8)?,
        invoice_paid: row.get(9)?,
        lockup_address: row.get(10)?,
        lockup_txid: row.get(11)?,
        lockup_amount_sat: opt_u64_col(row, 12)?,
        timeout_block_height: u32_col(row, 13)?,
        claim_txid: row.get(14)?,
        claimed_at: row.get(15)?,
        preimage: row.get(16)?,
    })
}

fn u64_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| conversion_error(idx, value))
}

fn opt_u64_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    let value: Option<i64> = row.get(idx)?;
    value
        .map(|v| u64::try_from(v).map_err(|_| conversion_error(idx, v)))
        .transpose()
}

fn u32_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|_| conversion_error(idx, value))
}

fn conversion_error(idx: usize, value: i64) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Integer,
        format!("value out of range: {value}").into(),
    )
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  status TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  preimage_hash TEXT NOT NULL,
  claim_public_key TEXT NOT NULL,
  claim_address TEXT NOT NULL,
  invoice_amount_sat INTEGER NOT NULL,
  invoice TEXT NOT NULL,
  invoice_paid INTEGER NOT NULL DEFAULT 0,
  lockup_address TEXT NOT NULL,
  lockup_txid TEXT,
  lockup_amount_sat INTEGER,
  timeout_block_height INTEGER NOT NULL,
  claim_txid TEXT,
  claimed_at INTEGER,
  preimage TEXT
);
CREATE INDEX IF NOT EXISTS swaps_status_idx ON swaps(status);
CREATE INDEX IF NOT EXISTS swaps_created_at_idx ON swaps(created_at);
CREATE UNIQUE INDEX IF NOT EXISTS swaps_preimage_hash_idx ON swaps(preimage_hash);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn status_to_str(status: SwapStatus) -> &'static str {
    match status {
        SwapStatus::Pending => "pending",
        SwapStatus::InvoicePaid => "invoice_paid",
        SwapStatus::Locked => "locked",
        SwapStatus::Claimed => "claimed",
        SwapStatus::Expired => "expired",
        SwapStatus::Refunded => "refunded",
        SwapStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str, col: usize) -> rusqlite::Result<SwapStatus> {
    match s {
        "pending" => Ok(SwapStatus::Pending),
        "invoice_paid" => Ok(SwapStatus::InvoicePaid),
        "locked" => Ok(SwapStatus::Locked),
        "claimed" => Ok(SwapStatus::Claimed),
        "expired" => Ok(SwapStatus::Expired),
        "refunded" => Ok(SwapStatus::Refunded),
        "failed" => Ok(SwapStatus::Failed),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown swap status: {other}").into(),
        )),
    }
}
