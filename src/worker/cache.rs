//! Named, versioned response caches and their SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::types::AssetResponse;
use super::WorkerError;

type Result<T> = std::result::Result<T, WorkerError>;

/// File name of the cache database inside the data directory.
pub const CACHE_FILE: &str = "asset-cache.db";

/// Summary of one cached response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
  pub key: String,
  pub status: u16,
  pub size: usize,
  pub sha256: String,
  pub stored_at: DateTime<Utc>,
}

/// Trait for asset cache backends.
///
/// A backend holds any number of named caches (one per shell version) plus
/// the name of the version currently serving.
pub trait AssetCache: Send + Sync {
  /// Names of all caches, oldest first.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and everything in it. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Store one response, creating the cache if needed.
  fn put(&self, cache: &str, key: &str, response: &AssetResponse) -> Result<()>;

  /// Store a batch of responses; either all are written or none are.
  fn put_all(&self, cache: &str, entries: &[(String, AssetResponse)]) -> Result<()>;

  /// Look up a response in one cache.
  fn lookup(&self, cache: &str, key: &str) -> Result<Option<AssetResponse>>;

  /// Describe the entries of one cache.
  fn entries(&self, cache: &str) -> Result<Vec<CacheEntryInfo>>;

  /// The version that last completed activation.
  fn active_version(&self) -> Result<Option<String>>;

  fn set_active_version(&self, version: &str) -> Result<()>;
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    body_sha256 TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);

CREATE TABLE IF NOT EXISTS worker_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const ACTIVE_VERSION_KEY: &str = "active_version";

/// SQLite-based asset cache.
pub struct SqliteAssetCache {
  conn: Mutex<Connection>,
}

impl SqliteAssetCache {
  /// Open (or create) the cache database inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join(CACHE_FILE);

    std::fs::create_dir_all(data_dir).map_err(|e| WorkerError::Unavailable {
      path: data_dir.to_path_buf(),
      reason: e.to_string(),
    })?;

    let conn = Connection::open(&path).map_err(|e| WorkerError::Unavailable {
      path: path.clone(),
      reason: e.to_string(),
    })?;

    Self::from_connection(conn, path)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory().map_err(|e| WorkerError::Unavailable {
      path: PathBuf::from(":memory:"),
      reason: e.to_string(),
    })?;

    Self::from_connection(conn, PathBuf::from(":memory:"))
  }

  fn from_connection(conn: Connection, path: PathBuf) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| WorkerError::Unavailable {
        path,
        reason: format!("failed to run cache migrations: {}", e),
      })?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| WorkerError::Cache("cache lock poisoned".to_string()))
  }
}

fn insert_entry(conn: &Connection, cache: &str, key: &str, response: &AssetResponse) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO caches (name) VALUES (?)",
    params![cache],
  )?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (cache_name, request_key, status, content_type, body, body_sha256, stored_at)
     VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      cache,
      key,
      response.status,
      response.content_type,
      response.body,
      response.digest()
    ],
  )?;
  Ok(())
}

impl AssetCache for SqliteAssetCache {
  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY created_at, name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])?;
    let removed = tx.execute("DELETE FROM caches WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn put(&self, cache: &str, key: &str, response: &AssetResponse) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, cache, key, response)
  }

  fn put_all(&self, cache: &str, entries: &[(String, AssetResponse)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    for (key, response) in entries {
      insert_entry(&tx, cache, key, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn lookup(&self, cache: &str, key: &str) -> Result<Option<AssetResponse>> {
    let conn = self.lock()?;
    let response = conn
      .query_row(
        "SELECT status, content_type, body FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
        |row| {
          Ok(AssetResponse {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()?;
    Ok(response)
  }

  fn entries(&self, cache: &str) -> Result<Vec<CacheEntryInfo>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT request_key, status, length(body), body_sha256, stored_at FROM cache_entries
       WHERE cache_name = ? ORDER BY request_key",
    )?;

    let rows = stmt
      .query_map(params![cache], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(key, status, size, sha256, stored_at)| {
        Ok(CacheEntryInfo {
          key,
          status,
          size: size.max(0) as usize,
          sha256,
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }

  fn active_version(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    let version = conn
      .query_row(
        "SELECT value FROM worker_state WHERE key = ?",
        params![ACTIVE_VERSION_KEY],
        |row| row.get(0),
      )
      .optional()?;
    Ok(version)
  }

  fn set_active_version(&self, version: &str) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO worker_state (key, value) VALUES (?, ?)",
      params![ACTIVE_VERSION_KEY, version],
    )?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| WorkerError::Cache(format!("failed to parse datetime '{}': {}", s, e)))
}
