//! Store trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::error::{Result, StoreError};
use super::partition::Partition;

/// File name of the store database inside the data directory.
pub const STORE_FILE: &str = "store.db";

/// Trait for local store backends.
pub trait Store: Send + Sync {
  /// Get the value stored under `key`, or `None` if it was never set.
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>>;

  /// Replace the value stored under `key` in full.
  fn set(&self, partition: Partition, key: &str, value: &Value) -> Result<()>;

  /// Remove every key in the partition.
  fn clear(&self, partition: Partition) -> Result<()>;

  /// List the keys present in the partition, sorted.
  fn keys(&self, partition: Partition) -> Result<Vec<String>>;

  /// Read-modify-write a single key atomically.
  ///
  /// `f` receives the current value (or `None`) and returns the value to write.
  /// No other writer can interleave between the read and the write, including
  /// writers in other processes sharing the same database file.
  fn update<F>(&self, partition: Partition, key: &str, f: F) -> Result<Value>
  where
    F: FnOnce(Option<Value>) -> Result<Value>;

  /// Typed `get`.
  fn get_json<T: DeserializeOwned>(&self, partition: Partition, key: &str) -> Result<Option<T>> {
    match self.get(partition, key)? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Serialization {
          partition,
          key: key.to_string(),
          source,
        }),
      None => Ok(None),
    }
  }

  /// Typed `set`.
  fn set_json<T: Serialize>(&self, partition: Partition, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serialization {
      partition,
      key: key.to_string(),
      source,
    })?;
    self.set(partition, key, &value)
  }
}

/// Schema migrations, applied in order. `PRAGMA user_version` records how many
/// have run, so reopening an existing database never recreates anything.
const MIGRATIONS: &[&str] = &[r#"
-- Last-used selection and other singletons
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One draft mapping per module
CREATE TABLE IF NOT EXISTS drafts (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Record sequences, newest first, keyed by module storage key
CREATE TABLE IF NOT EXISTS records (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#];

/// SQLite-based store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    Self::open_at(&data_dir.join(STORE_FILE))
  }

  /// Open (or create) the store at an explicit database path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
        path: parent.to_path_buf(),
        reason: e.to_string(),
      })?;
    }

    let conn = Connection::open(path).map_err(|e| StoreError::Unavailable {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })?;

    Self::from_connection(conn, path.to_path_buf())
  }

  /// Open a throwaway store that lives only as long as the value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
      path: PathBuf::from(":memory:"),
      reason: e.to_string(),
    })?;

    Self::from_connection(conn, PathBuf::from(":memory:"))
  }

  fn from_connection(conn: Connection, path: PathBuf) -> Result<Self> {
    let unavailable = |e: rusqlite::Error| StoreError::Unavailable {
      path: path.clone(),
      reason: e.to_string(),
    };

    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(unavailable)?;
    run_migrations(&conn).map_err(unavailable)?;

    debug!(path = %path.display(), "local store opened");

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
  let applied: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

  for (version, migration) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
    conn.execute_batch(migration)?;
    conn.pragma_update(None, "user_version", (version + 1) as i64)?;
  }

  Ok(())
}

fn read_value(conn: &Connection, partition: Partition, key: &str) -> Result<Option<Value>> {
  let sql = format!("SELECT value FROM {} WHERE key = ?", partition.table());

  let raw: Option<String> = conn
    .query_row(&sql, params![key], |row| row.get(0))
    .optional()
    .map_err(|source| StoreError::Read { partition, source })?;

  raw
    .map(|raw| {
      serde_json::from_str(&raw).map_err(|source| StoreError::Serialization {
        partition,
        key: key.to_string(),
        source,
      })
    })
    .transpose()
}

fn write_value(conn: &Connection, partition: Partition, key: &str, value: &Value) -> Result<()> {
  let sql = format!(
    "INSERT OR REPLACE INTO {} (key, value, updated_at) VALUES (?, ?, datetime('now'))",
    partition.table()
  );
  let data = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
    partition,
    key: key.to_string(),
    source,
  })?;

  conn
    .execute(&sql, params![key, data])
    .map_err(|source| StoreError::WriteRejected {
      partition,
      key: key.to_string(),
      source,
    })?;

  Ok(())
}

impl Store for SqliteStore {
  fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;
    read_value(&conn, partition, key)
  }

  fn set(&self, partition: Partition, key: &str, value: &Value) -> Result<()> {
    let conn = self.lock()?;
    write_value(&conn, partition, key, value)?;
    debug!(%partition, key, "stored value");
    Ok(())
  }

  fn clear(&self, partition: Partition) -> Result<()> {
    let conn = self.lock()?;
    let removed = conn
      .execute(&format!("DELETE FROM {}", partition.table()), [])
      .map_err(|source| StoreError::WriteRejected {
        partition,
        key: "*".to_string(),
        source,
      })?;
    debug!(%partition, removed, "cleared partition");
    Ok(())
  }

  fn keys(&self, partition: Partition) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let read_err = |source: rusqlite::Error| StoreError::Read { partition, source };

    let mut stmt = conn
      .prepare(&format!("SELECT key FROM {} ORDER BY key", partition.table()))
      .map_err(read_err)?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(read_err)?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(read_err)?;

    Ok(keys)
  }

  fn update<F>(&self, partition: Partition, key: &str, f: F) -> Result<Value>
  where
    F: FnOnce(Option<Value>) -> Result<Value>,
  {
    let mut conn = self.lock()?;
    let write_err = |source: rusqlite::Error| StoreError::WriteRejected {
      partition,
      key: key.to_string(),
      source,
    };

    // IMMEDIATE takes the write lock up front so the read below is not stale.
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(write_err)?;

    let current = read_value(&tx, partition, key)?;
    let next = f(current)?;
    write_value(&tx, partition, key, &next)?;
    tx.commit().map_err(write_err)?;

    debug!(%partition, key, "updated value");
    Ok(next)
  }
}
