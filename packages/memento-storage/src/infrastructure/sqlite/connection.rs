//! Shared SQLite connection handle and schema management.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// A shared handle to one SQLite connection, guarded by a mutex so the four store
/// traits (Entity/Relationship/Vector/History) can all operate on the same
/// database file and see each other's uncommitted transaction state.
///
/// `rusqlite::Connection` is `Send` but not `Sync`; wrapping it in
/// `parking_lot::Mutex` is the minimal amount of synchronization needed to share
/// it across the async store methods, all of which hand the blocking SQLite call
/// to `tokio::task::spawn_blocking` (§5: "CPU-bound parsing is offloaded... to
/// prevent it from blocking I/O schedulers" — the same policy applies to blocking
/// SQLite calls).
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let handle = Self { conn: Arc::new(Mutex::new(conn)) };
        handle.run_migrations()?;
        Ok(handle)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let handle = Self { conn: Arc::new(Mutex::new(conn)) };
        handle.run_migrations()?;
        Ok(handle)
    }

    /// Run a blocking closure against the shared connection on a blocking-pool
    /// thread, keeping the async executor free of SQLite's synchronous I/O.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::database(format!("blocking task panicked: {e}")))?
    }

    fn run_migrations(&self) -> Result<()> {
        let guard = self.conn.lock();
        guard.execute_batch(SCHEMA)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    kind_label TEXT NOT NULL,
    path TEXT NOT NULL,
    name TEXT,
    hash TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind_label);
CREATE INDEX IF NOT EXISTS idx_entities_path ON entities(path);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);

CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    from_entity_id TEXT NOT NULL,
    to_entity_id TEXT,
    type TEXT NOT NULL,
    active INTEGER NOT NULL,
    confidence REAL,
    last_seen_at TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rel_from ON relationships(from_entity_id);
CREATE INDEX IF NOT EXISTS idx_rel_to ON relationships(to_entity_id);
CREATE INDEX IF NOT EXISTS idx_rel_type ON relationships(type);
CREATE INDEX IF NOT EXISTS idx_rel_active ON relationships(active);

-- §4.6's Reopened transition: a closed edge's canonical id gets reused by the
-- next active interval, so the closed interval is archived here first. Keyed
-- by (id, validFrom) rather than just id, since one canonical edge can close
-- and reopen more than once over its lifetime.
CREATE TABLE IF NOT EXISTS relationship_history (
    history_id TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    from_entity_id TEXT NOT NULL,
    to_entity_id TEXT,
    type TEXT NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rel_history_id ON relationship_history(id);
CREATE INDEX IF NOT EXISTS idx_rel_history_from ON relationship_history(from_entity_id);
CREATE INDEX IF NOT EXISTS idx_rel_history_to ON relationship_history(to_entity_id);

CREATE TABLE IF NOT EXISTS vectors (
    entity_id TEXT PRIMARY KEY,
    vector BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    metadata TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS versions (
    rowid_pk INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL,
    hash TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    metadata TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_versions_entity ON versions(entity_id);

CREATE TABLE IF NOT EXISTS checkpoints (
    id TEXT PRIMARY KEY,
    reason TEXT NOT NULL,
    hops INTEGER NOT NULL,
    seed_entities TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_includes (
    checkpoint_id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    PRIMARY KEY (checkpoint_id, entity_id)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_runs_migrations() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let count: i64 = handle
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='entities'",
                    [],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
