//! Archive stores for scheduled snapshots.
//!
//! The on-disk format belongs to the archival collaborator; the core only
//! needs an append/read seam. `SqliteArchiveStore` is the production
//! store, `InMemoryArchiveStore` backs tests and the error-injection
//! paths.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::snapshot::{now_epoch_s, Snapshot};

pub trait ArchiveStore: Send {
    fn append_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Read stored snapshots, oldest first.
    fn read_snapshots(&mut self, limit: usize) -> Result<Vec<Snapshot>>;
}

// -------------------- Sqlite store --------------------

pub struct SqliteArchiveStore {
    conn: Connection,
}

impl SqliteArchiveStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS snapshots (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              frame_index INTEGER NOT NULL,
              closing INTEGER NOT NULL DEFAULT 0,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_created ON snapshots(created_at);
            "#,
        )?;
        Ok(())
    }
}

impl ArchiveStore for SqliteArchiveStore {
    fn append_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let created_at = now_epoch_s()? as i64;
        let frame_index = i64::try_from(snapshot.frame_index)
            .map_err(|_| anyhow!("frame index exceeds i64 range"))?;
        let payload_json = serde_json::to_string(snapshot)?;

        self.conn.execute(
            r#"
            INSERT INTO snapshots(created_at, frame_index, closing, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![created_at, frame_index, snapshot.closing, payload_json],
        )?;
        Ok(())
    }

    fn read_snapshots(&mut self, limit: usize) -> Result<Vec<Snapshot>> {
        let payloads = {
            let mut stmt = self
                .conn
                .prepare("SELECT payload_json FROM snapshots ORDER BY id ASC LIMIT ?1")?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut payloads = Vec::new();

            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                payloads.push(payload);
            }

            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let snapshot: Snapshot = serde_json::from_str(&payload)?;
            out.push(snapshot);
        }
        Ok(out)
    }
}

// -------------------- In-memory store --------------------

/// Shared-handle in-memory store: clones see the same rows, so a test can
/// keep a handle while the archive worker owns the other.
#[derive(Clone, Debug, Default)]
pub struct InMemoryArchiveStore {
    rows: Arc<Mutex<Vec<Snapshot>>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.rows.lock().expect("archive store lock").clone()
    }
}

impl ArchiveStore for InMemoryArchiveStore {
    fn append_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("archive store lock poisoned"))?
            .push(snapshot.clone());
        Ok(())
    }

    fn read_snapshots(&mut self, limit: usize) -> Result<Vec<Snapshot>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("archive store lock poisoned"))?;
        Ok(rows.iter().take(limit).cloned().collect())
    }
}
