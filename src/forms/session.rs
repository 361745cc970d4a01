//! Application state and the draft/record lifecycle of a form.

use std::sync::Arc;
use tracing::info;

use super::catalog::ModuleDef;
use super::records::{append_record, count_records, load_records, Record};
use super::schema::{form_values, validate, FieldValues};
use super::FormError;
use crate::store::{Partition, Store};

/// Number of records shown in a local listing.
pub const RECENT_LIMIT: usize = 20;

/// The modules on offer and which one is active.
///
/// Passed explicitly to whatever renders the shell; nothing else holds it.
#[derive(Debug, Clone, Default)]
pub struct AppState {
  pub modules: Vec<ModuleDef>,
  pub active: Option<String>,
}

impl AppState {
  /// State with the first module active.
  pub fn new(modules: Vec<ModuleDef>) -> Self {
    let active = modules.first().map(|m| m.key.clone());
    Self { modules, active }
  }

  pub fn module(&self, key: &str) -> Option<&ModuleDef> {
    self.modules.iter().find(|m| m.key == key)
  }

  /// Make `key` the active module.
  pub fn select(&mut self, key: &str) -> Result<&ModuleDef, FormError> {
    let index = self
      .modules
      .iter()
      .position(|m| m.key == key)
      .ok_or_else(|| FormError::UnknownModule(key.to_string()))?;

    self.active = Some(key.to_string());
    Ok(&self.modules[index])
  }

  /// The active module, or the first one if the active key is stale.
  pub fn active_module(&self) -> Option<&ModuleDef> {
    self
      .active
      .as_deref()
      .and_then(|key| self.module(key))
      .or_else(|| self.modules.first())
  }
}

/// Drafts key for a module.
pub fn draft_key(module: &ModuleDef) -> String {
  format!("draft:{}", module.key)
}

/// Draft and record operations for forms, backed by a store.
pub struct FormService<S: Store> {
  store: Arc<S>,
}

impl<S: Store> FormService<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  /// The saved draft for the module; empty if none was ever saved.
  pub fn load_draft(&self, module: &ModuleDef) -> Result<FieldValues, FormError> {
    Ok(
      self
        .store
        .get_json::<FieldValues>(Partition::Drafts, &draft_key(module))?
        .unwrap_or_default(),
    )
  }

  /// Values to show in the form: draft values over field defaults.
  pub fn current_values(&self, module: &ModuleDef) -> Result<FieldValues, FormError> {
    Ok(form_values(module, &self.load_draft(module)?))
  }

  /// Apply edits to the form and overwrite the draft with the whole form.
  pub fn edit_draft(
    &self,
    module: &ModuleDef,
    changes: &FieldValues,
  ) -> Result<FieldValues, FormError> {
    for key in changes.keys() {
      if module.field(key).is_none() {
        return Err(FormError::UnknownField {
          module: module.key.clone(),
          field: key.clone(),
        });
      }
    }

    let mut values = self.current_values(module)?;
    values.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));

    self
      .store
      .set_json(Partition::Drafts, &draft_key(module), &values)?;
    Ok(values)
  }

  /// Reset the draft to an empty mapping.
  pub fn reset_draft(&self, module: &ModuleDef) -> Result<(), FormError> {
    self
      .store
      .set_json(Partition::Drafts, &draft_key(module), &FieldValues::new())?;
    Ok(())
  }

  /// Validate the form (draft plus `changes`), append it as a record and
  /// reset the draft. Returns the record and how many entries the module's
  /// sequence now holds.
  ///
  /// On a validation failure nothing is written and the draft is kept.
  pub fn submit(
    &self,
    module: &ModuleDef,
    changes: &FieldValues,
  ) -> Result<(Record, usize), FormError> {
    let mut values = self.current_values(module)?;
    values.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
    let values = form_values(module, &values);

    validate(module, &values)?;

    let record = Record::new(&module.key, values);
    let count = append_record(self.store.as_ref(), module.storage_key(), &record)?;
    self.reset_draft(module)?;

    info!(
      module = %module.key,
      storage_key = module.storage_key(),
      id = %record.local_id,
      count,
      "saved offline"
    );
    Ok((record, count))
  }

  /// Newest records for the module, at most `limit`.
  pub fn recent_records(&self, module: &ModuleDef, limit: usize) -> Result<Vec<Record>, FormError> {
    let mut records = load_records(self.store.as_ref(), module.storage_key())?;
    records.truncate(limit);
    Ok(records)
  }

  /// Total number of records stored for the module.
  pub fn record_count(&self, module: &ModuleDef) -> Result<usize, FormError> {
    Ok(count_records(self.store.as_ref(), module.storage_key())?)
  }
}

impl<S: Store> Clone for FormService<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}
