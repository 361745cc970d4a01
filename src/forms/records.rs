//! Append-only record sequences.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::schema::FieldValues;
use crate::store::{Partition, Result, Store, StoreError};

/// Fields checked, in order, when picking a display title for a record.
const TITLE_FIELDS: &[&str] = &[
  "identification",
  "name",
  "vaccine_name",
  "animal_identification",
];

/// One saved submission. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  #[serde(rename = "_localId")]
  pub local_id: Uuid,
  #[serde(rename = "_module")]
  pub module: String,
  /// Milliseconds since the Unix epoch
  #[serde(rename = "_createdAt")]
  pub created_at: i64,
  #[serde(flatten)]
  pub fields: FieldValues,
}

impl Record {
  /// Stamp a new record with a fresh id and the current time.
  pub fn new(module: &str, fields: FieldValues) -> Self {
    Self {
      local_id: Uuid::new_v4(),
      module: module.to_string(),
      created_at: Utc::now().timestamp_millis(),
      fields,
    }
  }

  /// Short label for listings.
  pub fn title(&self) -> String {
    TITLE_FIELDS
      .iter()
      .filter_map(|k| self.fields.get(*k))
      .find(|v| !v.is_empty())
      .cloned()
      .unwrap_or_else(|| self.local_id.to_string())
  }

  pub fn created_at_local(&self) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(self.created_at).single()
  }
}

/// Prepend `record` to the sequence stored under `storage_key`.
///
/// Read, prepend and write happen inside one store transaction, so concurrent
/// appenders (other processes included) cannot drop each other's entries.
/// Existing entries are carried over untouched. Returns the new length.
pub fn append_record<S: Store>(store: &S, storage_key: &str, record: &Record) -> Result<usize> {
  let entry = serde_json::to_value(record).map_err(|source| StoreError::Serialization {
    partition: Partition::Records,
    key: storage_key.to_string(),
    source,
  })?;

  let written = store.update(Partition::Records, storage_key, |current| {
    let mut entries: Vec<Value> = match current {
      Some(value) => {
        serde_json::from_value(value).map_err(|source| StoreError::Serialization {
          partition: Partition::Records,
          key: storage_key.to_string(),
          source,
        })?
      }
      None => Vec::new(),
    };
    entries.insert(0, entry);
    Ok(Value::Array(entries))
  })?;

  let len = written.as_array().map_or(0, Vec::len);
  debug!(storage_key, id = %record.local_id, len, "record appended");
  Ok(len)
}

/// Load the record sequence for `storage_key`, newest first.
///
/// Entries that do not have the record shape are skipped.
pub fn load_records<S: Store>(store: &S, storage_key: &str) -> Result<Vec<Record>> {
  let entries = load_entries(store, storage_key)?;
  let total = entries.len();

  let records: Vec<Record> = entries
    .into_iter()
    .filter_map(|entry| serde_json::from_value(entry).ok())
    .collect();

  if records.len() < total {
    debug!(storage_key, skipped = total - records.len(), "skipped foreign entries");
  }
  Ok(records)
}

/// Number of entries stored under `storage_key`, foreign ones included.
pub fn count_records<S: Store>(store: &S, storage_key: &str) -> Result<usize> {
  Ok(load_entries(store, storage_key)?.len())
}

fn load_entries<S: Store>(store: &S, storage_key: &str) -> Result<Vec<Value>> {
  Ok(
    store
      .get_json::<Vec<Value>>(Partition::Records, storage_key)?
      .unwrap_or_default(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::SqliteStore;
  use serde_json::json;
  use std::collections::HashSet;

  fn fields(pairs: &[(&str, &str)]) -> FieldValues {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_serialized_shape_uses_reserved_keys() {
    let record = Record::new("vaccine", fields(&[("dose", "1")]));
    let value = serde_json::to_value(&record).unwrap();

    assert_eq!(value["_module"], json!("vaccine"));
    assert_eq!(value["dose"], json!("1"));
    assert!(value["_localId"].is_string());
    assert!(value["_createdAt"].is_i64());
  }

  #[test]
  fn test_n_appends_are_newest_first_with_distinct_ids() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut appended = Vec::new();

    for i in 0..25 {
      let record = Record::new("animal_create", fields(&[("identification", &i.to_string())]));
      let len = append_record(&store, "animals", &record).unwrap();
      assert_eq!(len, i + 1);
      appended.push(record);
    }

    let stored = load_records(&store, "animals").unwrap();
    assert_eq!(stored.len(), 25);

    appended.reverse();
    assert_eq!(stored, appended);

    let ids: HashSet<Uuid> = stored.iter().map(|r| r.local_id).collect();
    assert_eq!(ids.len(), 25);
  }

  #[test]
  fn test_append_keeps_foreign_entries() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .set(Partition::Records, "animals", &json!([{"legacy": true}]))
      .unwrap();

    let record = Record::new("animal_create", fields(&[("identification", "A9")]));
    append_record(&store, "animals", &record).unwrap();

    let raw = store.get(Partition::Records, "animals").unwrap().unwrap();
    assert_eq!(raw.as_array().unwrap().len(), 2);
    assert_eq!(raw[1], json!({"legacy": true}));
  }

  #[test]
  fn test_load_skips_foreign_entries_but_counts_them() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
      .set(Partition::Records, "animals", &json!([{"legacy": true}, "stray"]))
      .unwrap();

    let record = Record::new("animal_create", fields(&[("identification", "A9")]));
    append_record(&store, "animals", &record).unwrap();

    assert_eq!(load_records(&store, "animals").unwrap(), vec![record]);
    assert_eq!(count_records(&store, "animals").unwrap(), 3);
  }

  #[test]
  fn test_append_refuses_non_sequence_value() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.set(Partition::Records, "animals", &json!({"oops": 1})).unwrap();

    let record = Record::new("animal_create", FieldValues::new());
    let result = append_record(&store, "animals", &record);

    assert!(matches!(result, Err(StoreError::Serialization { .. })));
    assert_eq!(
      store.get(Partition::Records, "animals").unwrap(),
      Some(json!({"oops": 1}))
    );
  }

  #[test]
  fn test_concurrent_appends_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path()).unwrap();

    // One connection per writer, so only the database transaction serializes them.
    let handles: Vec<_> = (0..8)
      .map(|i| {
        let data_dir = dir.path().to_path_buf();
        std::thread::spawn(move || {
          let store = SqliteStore::open(&data_dir).unwrap();
          for j in 0..10 {
            let record = Record::new("vaccine", fields(&[("dose", &format!("{}-{}", i, j))]));
            append_record(&store, "vaccinations", &record).unwrap();
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }

    let stored = load_records(&store, "vaccinations").unwrap();
    assert_eq!(stored.len(), 80);
    let ids: HashSet<Uuid> = stored.iter().map(|r| r.local_id).collect();
    assert_eq!(ids.len(), 80);
  }

  #[test]
  fn test_missing_sequence_loads_empty() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(load_records(&store, "nothing").unwrap().is_empty());
  }

  #[test]
  fn test_title_prefers_identification_fields() {
    let record = Record::new(
      "vaccine",
      fields(&[("vaccine_name", "V1"), ("animal_identification", "A1")]),
    );
    assert_eq!(record.title(), "V1");

    let blank = Record::new("x", fields(&[("identification", "")]));
    assert_eq!(blank.title(), blank.local_id.to_string());
  }
}
