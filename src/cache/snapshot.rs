//! Warm-start snapshot storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Durable key-value store for cache snapshots.
///
/// Each cache namespace owns one serialized snapshot. Implementations may
/// fail freely; the cache only logs the failure.
pub trait SnapshotStore: Send + Sync {
  /// Read the last snapshot written for `namespace`.
  fn load(&self, namespace: &str) -> Result<Option<String>>;

  /// Replace the snapshot for `namespace`.
  fn save(&self, namespace: &str, data: &str) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when caching to disk is disabled - all operations are no-ops.
pub struct NoopSnapshotStore;

impl SnapshotStore for NoopSnapshotStore {
  fn load(&self, _namespace: &str) -> Result<Option<String>> {
    Ok(None) // Always cold
  }

  fn save(&self, _namespace: &str, _data: &str) -> Result<()> {
    Ok(()) // Discard
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteSnapshotStore {
  conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
  /// Open the snapshot database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the snapshot database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("boardsync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_snapshot (
    namespace TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    checksum TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn checksum(data: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data.as_bytes());
  hex::encode(hasher.finalize())
}

impl SnapshotStore for SqliteSnapshotStore {
  fn load(&self, namespace: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT data, checksum FROM cache_snapshot WHERE namespace = ?",
        params![namespace],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot {}: {}", namespace, e))?;

    match row {
      Some((data, sum)) if sum == checksum(&data) => Ok(Some(data)),
      Some(_) => {
        warn!(namespace, "snapshot checksum mismatch, ignoring it");
        Ok(None)
      }
      None => Ok(None),
    }
  }

  fn save(&self, namespace: &str, data: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_snapshot (namespace, data, checksum, saved_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![namespace, data, checksum(data)],
      )
      .map_err(|e| eyre!("Failed to store snapshot {}: {}", namespace, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteSnapshotStore::open(&dir.path().join("cache.db")).unwrap();

    assert_eq!(store.load("tasks").unwrap(), None);
    store.save("tasks", r#"{"a":1}"#).unwrap();
    store.save("tasks", r#"{"a":2}"#).unwrap();
    assert_eq!(store.load("tasks").unwrap().as_deref(), Some(r#"{"a":2}"#));
    assert_eq!(store.load("boards").unwrap(), None);
  }

  #[test]
  fn test_tampered_snapshot_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let store = SqliteSnapshotStore::open(&path).unwrap();
    store.save("tasks", r#"{"a":1}"#).unwrap();

    {
      let conn = store.conn.lock().unwrap();
      conn
        .execute(
          "UPDATE cache_snapshot SET data = 'garbage' WHERE namespace = 'tasks'",
          [],
        )
        .unwrap();
    }

    assert_eq!(store.load("tasks").unwrap(), None);
  }

  #[test]
  fn test_noop_store_is_always_cold() {
    let store = NoopSnapshotStore;
    store.save("tasks", "{}").unwrap();
    assert_eq!(store.load("tasks").unwrap(), None);
  }
}
