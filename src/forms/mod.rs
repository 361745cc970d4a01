//! Dynamic forms: module catalog, selection, drafts and saved records.

pub mod catalog;
pub mod records;
pub mod schema;
pub mod selection;
pub mod session;

use thiserror::Error;

use crate::store::StoreError;

pub use catalog::{Catalog, ModuleDef};
pub use schema::FieldValues;
pub use selection::{resolve_selection, SelectionSource};
pub use session::{AppState, FormService, RECENT_LIMIT};

#[derive(Debug, Error)]
pub enum FormError {
  #[error("module '{0}' is not part of the current selection")]
  UnknownModule(String),

  #[error("module {module} has no field '{field}'")]
  UnknownField { module: String, field: String },

  #[error("required field missing: {field}")]
  MissingRequired { field: String },

  #[error("invalid value for {field}: {reason}")]
  InvalidValue { field: String, reason: String },

  #[error(transparent)]
  Store(#[from] StoreError),
}
