//! Block store (`spec.md` §4.G): a durable keyed table over
//! `(slot, proposer_index)`, backed by an embedded SQLite file via
//! `rusqlite` — the same embedded single-file relational choice the
//! original used (`sqlite3`), grounded in the pack on
//! `Chia-Network-chia_rs`'s own `rusqlite` dependency.
//!
//! Concurrency model (`spec.md` §5): one writer connection serializes all
//! inserts behind a `tokio::sync::Mutex`; reads open their own short-lived
//! connection so they proceed concurrently with a write in progress (the
//! database runs in WAL mode for exactly this reason).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{BlockRow, Client, OutputLabel};

const CLIENT_COLUMNS: [(&str, Client); 6] = [
    ("pr_lighthouse", Client::Lighthouse),
    ("pr_lodestar", Client::Lodestar),
    ("pr_nimbus", Client::Nimbus),
    ("pr_other", Client::Other),
    ("pr_prysm", Client::Prysm),
    ("pr_teku", Client::Teku),
];

/// An inclusive-start, exclusive-end slot gap: `[start, end]` inclusive per
/// `spec.md` §4.G ("Gaps are inclusive on both ends").
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Gap {
    pub start: u64,
    pub end: u64,
}

pub struct BlockStore {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl BlockStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let path_for_blocking = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path_for_blocking)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .expect("blocking task panicked")?;

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_reader(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.path)?)
    }

    /// Inserts a batch of rows as a single transaction. Unique-constraint
    /// violations on `(slot, proposer_index)` are ignored per row
    /// (idempotent re-ingest); any other failure aborts the whole batch.
    pub async fn insert_blocks(&self, rows: Vec<BlockRow>) -> Result<(), StoreError> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = writer.blocking_lock();
            let tx = conn.transaction()?;
            for row in &rows {
                insert_one(&tx, row)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn max_slot(&self) -> Result<u64, StoreError> {
        self.with_reader(|conn| {
            let slot: Option<i64> = conn
                .query_row("SELECT MAX(slot) FROM blocks", [], |r| r.get(0))
                .optional()?
                .flatten();
            Ok(slot.unwrap_or(0) as u64)
        })
        .await
    }

    pub async fn greatest_slot_below(&self, slot: u64) -> Result<Option<u64>, StoreError> {
        self.with_reader(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT MAX(slot) FROM blocks WHERE slot < ?1",
                    params![slot as i64],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            Ok(found.map(|s| s as u64))
        })
        .await
    }

    /// `(slot, parent_slot)` pairs for every row whose parent slot is not
    /// itself persisted, excluding slot 1 (the genesis special case).
    pub async fn missing_parents(&self) -> Result<Vec<(u64, u64)>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.slot, b.parent_slot FROM blocks b
                 WHERE b.slot <> 1
                   AND NOT EXISTS (SELECT 1 FROM blocks p WHERE p.slot = b.parent_slot)",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, i64>(0)? as u64, r.get::<_, i64>(1)? as u64)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Computed from `missing_parents()`: disjoint, increasing, inclusive
    /// slot intervals not yet covered by a contiguous chain to genesis.
    pub async fn sync_gaps(&self) -> Result<Vec<Gap>, StoreError> {
        let missing = self.missing_parents().await?;
        let mut gaps = Vec::with_capacity(missing.len());
        for (block_slot, parent_slot) in missing {
            let start = match self.greatest_slot_below(parent_slot).await? {
                Some(p) => p + 1,
                None => 0,
            };
            let end = block_slot.saturating_sub(1);
            if start <= end {
                gaps.push(Gap { start, end });
            }
        }
        gaps.sort_by_key(|g| g.start);
        Ok(merge_gaps(gaps))
    }

    pub async fn sync_status(&self) -> Result<(u64, bool), StoreError> {
        let max_slot = self.max_slot().await?;
        let synced = self.missing_parents().await?.is_empty();
        Ok((max_slot, synced))
    }

    /// Frequency table over `best_guess_single` in `[start_slot, end_slot)`,
    /// pre-populated with every client in `enabled` plus `Uncertain`.
    pub async fn blocks_per_client(
        &self,
        start_slot: u64,
        end_slot: u64,
        enabled: &[Client],
    ) -> Result<BTreeMap<String, i64>, StoreError> {
        let mut counts: BTreeMap<String, i64> = enabled
            .iter()
            .map(|c| (c.as_str().to_string(), 0))
            .collect();
        counts.insert("Uncertain".to_string(), 0);

        let rows = self
            .with_reader(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT best_guess_single, COUNT(*) FROM blocks
                     WHERE slot >= ?1 AND slot < ?2
                     GROUP BY best_guess_single",
                )?;
                let rows = stmt
                    .query_map(params![start_slot as i64, end_slot as i64], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        for (label, count) in rows {
            counts.insert(label, count);
        }
        Ok(counts)
    }

    pub async fn validator_blocks(
        &self,
        validator_index: u64,
        since_slot: u64,
    ) -> Result<Vec<BlockRow>, StoreError> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLS} FROM blocks WHERE proposer_index = ?1 AND slot >= ?2 ORDER BY slot ASC",
            ))?;
            let rows = stmt
                .query_map(params![validator_index as i64, since_slot as i64], row_to_block)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// For each proposer, its highest-slot row (label only).
    pub async fn all_validators_latest_blocks(
        &self,
    ) -> Result<Vec<(u64, u64, OutputLabel)>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT proposer_index, slot, best_guess_single FROM blocks b
                 WHERE slot = (SELECT MAX(slot) FROM blocks WHERE proposer_index = b.proposer_index)
                 ORDER BY proposer_index ASC",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    let proposer: i64 = r.get(0)?;
                    let slot: i64 = r.get(1)?;
                    let label: String = r.get(2)?;
                    Ok((proposer as u64, slot as u64, parse_output_label(&label)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn blocks(&self, start_slot: u64, end_slot: Option<u64>) -> Result<Vec<BlockRow>, StoreError> {
        self.with_reader(move |conn| {
            let rows = match end_slot {
                Some(end) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLS} FROM blocks WHERE slot >= ?1 AND slot < ?2 ORDER BY slot ASC",
                    ))?;
                    stmt.query_map(params![start_slot as i64, end as i64], row_to_block)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {COLS} FROM blocks WHERE slot >= ?1 ORDER BY slot ASC",
                    ))?;
                    stmt.query_map(params![start_slot as i64], row_to_block)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
        .await
    }

    /// Four confusion-matrix counts for `client` over the half-open slot
    /// range `[slot_lower, slot_upper)` (`spec.md` §4.G).
    pub async fn confusion(
        &self,
        client: Client,
        slot_lower: u64,
        slot_upper: u64,
    ) -> Result<Confusion, StoreError> {
        let client_name = client.as_str().to_string();
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    SUM(CASE WHEN best_guess_single = ?1 AND graffiti_guess = ?1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN best_guess_single <> ?1 AND graffiti_guess IS NOT NULL AND graffiti_guess <> ?1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN best_guess_single = ?1 AND graffiti_guess IS NOT NULL AND graffiti_guess <> ?1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN best_guess_single <> ?1 AND graffiti_guess = ?1 THEN 1 ELSE 0 END)
                 FROM blocks
                 WHERE slot >= ?2 AND slot < ?3",
            )?;
            let (tp, tn, fp, fn_): (Option<i64>, Option<i64>, Option<i64>, Option<i64>) = stmt
                .query_row(params![client_name, slot_lower as i64, slot_upper as i64], |r| {
                    Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
                })?;
            Ok(Confusion {
                true_pos: tp.unwrap_or(0),
                true_neg: tn.unwrap_or(0),
                false_pos: fp.unwrap_or(0),
                false_neg: fn_.unwrap_or(0),
            })
        })
        .await
    }

    async fn with_reader<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            f(&conn)
        })
        .await
        .expect("blocking task panicked")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Confusion {
    pub true_pos: i64,
    pub true_neg: i64,
    pub false_pos: i64,
    pub false_neg: i64,
}

const COLS: &str = "slot, parent_slot, proposer_index, best_guess_single, best_guess_multi, graffiti_guess, pr_lighthouse, pr_lodestar, pr_nimbus, pr_other, pr_prysm, pr_teku";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocks (
    slot INTEGER NOT NULL,
    parent_slot INTEGER NOT NULL,
    proposer_index INTEGER NOT NULL,
    best_guess_single TEXT NOT NULL,
    best_guess_multi TEXT NOT NULL,
    graffiti_guess TEXT,
    pr_lighthouse REAL NOT NULL DEFAULT 0,
    pr_lodestar REAL NOT NULL DEFAULT 0,
    pr_nimbus REAL NOT NULL DEFAULT 0,
    pr_other REAL NOT NULL DEFAULT 0,
    pr_prysm REAL NOT NULL DEFAULT 0,
    pr_teku REAL NOT NULL DEFAULT 0,
    UNIQUE(slot, proposer_index)
);
CREATE INDEX IF NOT EXISTS block_proposers ON blocks (proposer_index);
CREATE INDEX IF NOT EXISTS block_slots ON blocks (slot);
";

fn insert_one(tx: &rusqlite::Transaction<'_>, row: &BlockRow) -> Result<(), StoreError> {
    let mut pr = [0.0f64; 6];
    for (i, (_, client)) in CLIENT_COLUMNS.iter().enumerate() {
        if let Some(p) = row.probabilities.get(client) {
            pr[i] = *p;
        }
    }
    tx.execute(
        "INSERT OR IGNORE INTO blocks
            (slot, parent_slot, proposer_index, best_guess_single, best_guess_multi,
             graffiti_guess, pr_lighthouse, pr_lodestar, pr_nimbus, pr_other, pr_prysm, pr_teku)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.slot as i64,
            row.parent_slot as i64,
            row.proposer_index as i64,
            row.best_guess_single.to_string(),
            row.best_guess_multi,
            row.graffiti_guess.map(|c| c.as_str().to_string()),
            pr[0], pr[1], pr[2], pr[3], pr[4], pr[5],
        ],
    )?;
    Ok(())
}

fn row_to_block(r: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRow> {
    let best_guess_single: String = r.get(3)?;
    let graffiti_guess: Option<String> = r.get(5)?;
    let mut probabilities = BTreeMap::new();
    for (i, (_, client)) in CLIENT_COLUMNS.iter().enumerate() {
        let p: f64 = r.get(6 + i)?;
        probabilities.insert(*client, p);
    }
    Ok(BlockRow {
        slot: r.get::<_, i64>(0)? as u64,
        parent_slot: r.get::<_, i64>(1)? as u64,
        proposer_index: r.get::<_, i64>(2)? as u64,
        best_guess_single: parse_output_label(&best_guess_single),
        best_guess_multi: r.get(4)?,
        probabilities,
        graffiti_guess: graffiti_guess.and_then(|s| Client::from_str_opt(&s)),
    })
}

fn parse_output_label(s: &str) -> OutputLabel {
    match Client::from_str_opt(s) {
        Some(c) => OutputLabel::Client(c),
        None => OutputLabel::Uncertain,
    }
}

/// Merges overlapping/adjacent gaps so `sync_gaps()` always returns a
/// disjoint, increasing sequence (`spec.md` §8 invariant 5).
fn merge_gaps(gaps: Vec<Gap>) -> Vec<Gap> {
    let mut out: Vec<Gap> = Vec::with_capacity(gaps.len());
    for g in gaps {
        if let Some(last) = out.last_mut() {
            if g.start <= last.end + 1 {
                last.end = last.end.max(g.end);
                continue;
            }
        }
        out.push(g);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(slot: u64, parent_slot: u64, proposer: u64) -> BlockRow {
        BlockRow {
            slot,
            parent_slot,
            proposer_index: proposer,
            best_guess_single: OutputLabel::Client(Client::Prysm),
            best_guess_multi: "Prysm".to_string(),
            probabilities: BTreeMap::from([(Client::Prysm, 1.0)]),
            graffiti_guess: Some(Client::Prysm),
        }
    }

    #[tokio::test]
    async fn s3_sync_gaps_scenario() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();

        store.insert_blocks(vec![row(1, 0, 0), row(5, 4, 1), row(6, 5, 2)]).await.unwrap();

        assert_eq!(store.missing_parents().await.unwrap(), vec![(5, 4)]);
        assert_eq!(store.greatest_slot_below(4).await.unwrap(), Some(1));
        assert_eq!(store.sync_gaps().await.unwrap(), vec![Gap { start: 2, end: 4 }]);
    }

    #[tokio::test]
    async fn ingest_idempotence() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();

        let rows = vec![row(10, 9, 1)];
        store.insert_blocks(rows.clone()).await.unwrap();
        store.insert_blocks(rows).await.unwrap();

        let blocks = store.blocks(0, None).await.unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn max_slot_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();
        assert_eq!(store.max_slot().await.unwrap(), 0);
        assert_eq!(store.sync_status().await.unwrap(), (0, true));
    }

    #[tokio::test]
    async fn confusion_counts() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();

        let mut tp_row = row(1, 0, 1);
        tp_row.best_guess_single = OutputLabel::Client(Client::Prysm);
        tp_row.graffiti_guess = Some(Client::Prysm);

        let mut fp_row = row(2, 1, 2);
        fp_row.best_guess_single = OutputLabel::Client(Client::Prysm);
        fp_row.graffiti_guess = Some(Client::Teku);

        let mut fn_row = row(3, 2, 3);
        fn_row.best_guess_single = OutputLabel::Client(Client::Teku);
        fn_row.graffiti_guess = Some(Client::Prysm);

        let mut tn_row = row(4, 3, 4);
        tn_row.best_guess_single = OutputLabel::Client(Client::Teku);
        tn_row.graffiti_guess = Some(Client::Teku);

        store.insert_blocks(vec![tp_row, fp_row, fn_row, tn_row]).await.unwrap();

        let confusion = store.confusion(Client::Prysm, 0, 100).await.unwrap();
        assert_eq!(confusion.true_pos, 1);
        assert_eq!(confusion.false_pos, 1);
        assert_eq!(confusion.false_neg, 1);
        assert_eq!(confusion.true_neg, 1);
    }

    #[tokio::test]
    async fn blocks_per_client_prepopulates_enabled_and_uncertain() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path().join("db.sqlite")).await.unwrap();
        store.insert_blocks(vec![row(1, 0, 1)]).await.unwrap();

        let counts = store
            .blocks_per_client(0, 100, &[Client::Prysm, Client::Teku])
            .await
            .unwrap();
        assert_eq!(counts.get("Prysm"), Some(&1));
        assert_eq!(counts.get("Teku"), Some(&0));
        assert_eq!(counts.get("Uncertain"), Some(&0));
    }
}
