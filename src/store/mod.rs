//! Partitioned key-value persistence for drafts, records and metadata.
//!
//! Values are arbitrary JSON; the store imposes no schema beyond
//! `(partition, key) -> value`. Every operation touches exactly one key, except
//! `clear`, which empties a whole partition.

mod error;
mod partition;
mod storage;

pub use error::{Result, StoreError};
pub use partition::Partition;
pub use storage::{SqliteStore, Store};
