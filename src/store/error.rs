use std::path::PathBuf;
use thiserror::Error;

use super::Partition;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by the local store. None of these are retried.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The persistence engine could not be opened at all.
  #[error("local store unavailable at {}: {reason}", path.display())]
  Unavailable { path: PathBuf, reason: String },

  /// A write was refused (disk full, constraint violation, read-only file).
  #[error("write rejected for {partition}/{key}: {source}")]
  WriteRejected {
    partition: Partition,
    key: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("failed to read from {partition}: {source}")]
  Read {
    partition: Partition,
    #[source]
    source: rusqlite::Error,
  },

  #[error("value at {partition}/{key} is not valid JSON: {source}")]
  Serialization {
    partition: Partition,
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("local store lock poisoned")]
  LockPoisoned,
}
