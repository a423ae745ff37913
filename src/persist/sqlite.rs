//! SQLite-backed [`KvStore`].

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{KvStore, PersistResult};

/// Schema steps indexed by `user_version`. Entry `n` upgrades from `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL
    );",
    "ALTER TABLE kv ADD COLUMN updated_ms INTEGER NOT NULL DEFAULT 0;",
];

/// SQLite implementation of [`crate::persist::KvStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates a store at `path` and migrates it to the latest schema.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(mut conn: Connection) -> PersistResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    /// Current schema version.
    pub fn schema_version(&self) -> PersistResult<usize> {
        let v: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(v as usize)
    }
}

fn migrate(conn: &mut Connection) -> PersistResult<()> {
    let from: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let from = from.max(0) as usize;
    if from >= MIGRATIONS.len() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for step in &MIGRATIONS[from..] {
        tx.execute_batch(step)?;
    }
    tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
    tx.commit()?;
    info!(from, to = MIGRATIONS.len(), "migrated history store schema");
    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn get_all(&self) -> PersistResult<Vec<(String, Vec<u8>)>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM kv ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut out: Vec<(String, Vec<u8>)> = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO kv(key, value, updated_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_ms = excluded.updated_ms",
            params![key, value, now_ms() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> PersistResult<bool> {
        let count = self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(count > 0)
    }

    fn clear(&mut self) -> PersistResult<()> {
        self.conn.execute("DELETE FROM kv", [])?;
        Ok(())
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
