//! Typed field values and submission validation.
//!
//! Forms carry plain strings. Before a submission is written it is checked
//! against the module definition, so malformed values are rejected here
//! rather than discovered when the records are read back.

use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;

use super::catalog::{FieldDef, FieldKind, ModuleDef};
use super::FormError;

/// Field key to raw string value, as forms and drafts hold them.
pub type FieldValues = BTreeMap<String, String>;

/// A validated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  /// Optional field left blank
  Empty,
  Text(String),
  Number(f64),
  Date(NaiveDate),
  Time(NaiveTime),
  Email(String),
  Choice(String),
}

impl FieldDef {
  /// Parse a raw value according to the field kind.
  pub fn parse(&self, raw: &str) -> Result<FieldValue, FormError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
      return if self.required {
        Err(FormError::MissingRequired {
          field: self.key.clone(),
        })
      } else {
        Ok(FieldValue::Empty)
      };
    }

    let invalid = |reason: String| FormError::InvalidValue {
      field: self.key.clone(),
      reason,
    };

    match &self.kind {
      FieldKind::Text | FieldKind::Textarea => Ok(FieldValue::Text(raw.to_string())),
      FieldKind::Number => trimmed
        .parse::<f64>()
        .map(FieldValue::Number)
        .map_err(|_| invalid(format!("'{}' is not a number", trimmed))),
      FieldKind::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(FieldValue::Date)
        .map_err(|_| invalid(format!("'{}' is not a date (YYYY-MM-DD)", trimmed))),
      FieldKind::Time => NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map(FieldValue::Time)
        .map_err(|_| invalid(format!("'{}' is not a time (HH:MM)", trimmed))),
      FieldKind::Email => {
        if trimmed.contains('@') {
          Ok(FieldValue::Email(trimmed.to_string()))
        } else {
          Err(invalid(format!("'{}' is not an email address", trimmed)))
        }
      }
      FieldKind::Select(options) => {
        if options.iter().any(|o| o.value == trimmed) {
          Ok(FieldValue::Choice(trimmed.to_string()))
        } else {
          let allowed: Vec<&str> = options
            .iter()
            .map(|o| o.value.as_str())
            .filter(|v| !v.is_empty())
            .collect();
          Err(invalid(format!(
            "'{}' is not one of: {}",
            trimmed,
            allowed.join(", ")
          )))
        }
      }
    }
  }
}

/// Fill in every field of the module: the given value, else the field
/// default, else an empty string. Keys the module does not define are dropped.
pub fn form_values(module: &ModuleDef, values: &FieldValues) -> FieldValues {
  module
    .fields
    .iter()
    .map(|field| {
      let value = values
        .get(&field.key)
        .cloned()
        .or_else(|| field.default.clone())
        .unwrap_or_default();
      (field.key.clone(), value)
    })
    .collect()
}

/// Validate a submission against the module.
///
/// Required fields are checked first, in field order, and the first blank one
/// is reported. Only then are the values parsed by kind.
pub fn validate(
  module: &ModuleDef,
  values: &FieldValues,
) -> Result<BTreeMap<String, FieldValue>, FormError> {
  let filled = form_values(module, values);

  if let Some(missing) = module
    .fields
    .iter()
    .find(|f| f.required && filled[&f.key].trim().is_empty())
  {
    return Err(FormError::MissingRequired {
      field: missing.key.clone(),
    });
  }

  module
    .fields
    .iter()
    .map(|f| f.parse(&filled[&f.key]).map(|v| (f.key.clone(), v)))
    .collect()
}
