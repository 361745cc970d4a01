//! Offline asset cache worker.
//!
//! Each worker version owns one named cache. Installing fetches the whole
//! shell into that cache (all or nothing); activating evicts every other
//! cache; once active, navigations are network-first with the cached entry
//! document as the offline fallback, and same-origin assets are cache-first.

pub mod cache;
pub mod fetcher;
pub mod lifecycle;
pub mod strategy;
pub mod types;

use std::path::PathBuf;
use thiserror::Error;

pub use cache::{AssetCache, SqliteAssetCache};
pub use fetcher::{Fetcher, HttpFetcher};
pub use lifecycle::{EventOutcome, FetchOutcome, ShellManifest, Worker, WorkerEvent, WorkerState};
pub use types::AssetRequest;

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error("asset cache unavailable at {}: {reason}", path.display())]
  Unavailable { path: PathBuf, reason: String },

  #[error("asset cache error: {0}")]
  Cache(String),

  #[error("asset cache query failed: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("install of {version} failed fetching {url}: {reason}")]
  InstallFailed {
    version: String,
    url: String,
    reason: String,
  },

  #[error("fetch failed for {url}: {reason}")]
  FetchFailed { url: String, reason: String },

  #[error("invalid shell path '{path}': {source}")]
  InvalidAsset {
    path: String,
    #[source]
    source: url::ParseError,
  },

  #[error("cache version {0} is not installed")]
  NotInstalled(String),

  #[error("worker {version} cannot {event} while {state:?}")]
  InvalidTransition {
    version: String,
    event: &'static str,
    state: WorkerState,
  },
}
