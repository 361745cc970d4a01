//! Module definitions: which fields a form has and where its records live.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An option of a `select` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
  #[serde(alias = "v", default)]
  pub value: String,
  /// Display text; the value is shown when absent
  #[serde(alias = "t", default)]
  pub label: Option<String>,
}

impl SelectOption {
  fn new(value: &str, label: &str) -> Self {
    Self {
      value: value.to_string(),
      label: Some(label.to_string()),
    }
  }
}

/// The kind of input a field accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
  Text,
  Textarea,
  Number,
  Date,
  Time,
  Email,
  Select(Vec<SelectOption>),
}

impl FieldKind {
  /// Map a type name to a kind. Unrecognised names become plain text.
  pub fn from_name(name: &str, options: Vec<SelectOption>) -> Self {
    match name.trim().to_lowercase().as_str() {
      "textarea" => FieldKind::Textarea,
      "number" => FieldKind::Number,
      "date" => FieldKind::Date,
      "time" => FieldKind::Time,
      "email" => FieldKind::Email,
      "select" => FieldKind::Select(options),
      _ => FieldKind::Text,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      FieldKind::Text => "text",
      FieldKind::Textarea => "textarea",
      FieldKind::Number => "number",
      FieldKind::Date => "date",
      FieldKind::Time => "time",
      FieldKind::Email => "email",
      FieldKind::Select(_) => "select",
    }
  }
}

/// Field as written in configuration files.
#[derive(Debug, Clone, Deserialize)]
struct RawField {
  key: String,
  #[serde(default)]
  label: Option<String>,
  #[serde(rename = "type", default)]
  kind: Option<String>,
  #[serde(default)]
  required: bool,
  #[serde(default)]
  default: Option<String>,
  #[serde(default)]
  options: Vec<SelectOption>,
}

/// A single form field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawField")]
pub struct FieldDef {
  pub key: String,
  pub label: String,
  pub kind: FieldKind,
  pub required: bool,
  pub default: Option<String>,
}

impl From<RawField> for FieldDef {
  fn from(raw: RawField) -> Self {
    let kind = FieldKind::from_name(raw.kind.as_deref().unwrap_or("text"), raw.options);
    Self {
      label: raw.label.unwrap_or_else(|| raw.key.clone()),
      key: raw.key,
      kind,
      required: raw.required,
      default: raw.default,
    }
  }
}

impl FieldDef {
  fn new(key: &str, label: &str, kind: FieldKind) -> Self {
    Self {
      key: key.to_string(),
      label: label.to_string(),
      kind,
      required: false,
      default: None,
    }
  }

  fn required(mut self) -> Self {
    self.required = true;
    self
  }
}

/// A data-entry module: a form plus the record sequence it appends to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleDef {
  pub key: String,
  pub label: String,
  #[serde(default)]
  pub description: Option<String>,
  /// Record sequence key; defaults to the module key
  #[serde(default)]
  pub storage_key: Option<String>,
  pub fields: Vec<FieldDef>,
}

impl ModuleDef {
  pub fn storage_key(&self) -> &str {
    self.storage_key.as_deref().unwrap_or(&self.key)
  }

  pub fn field(&self, key: &str) -> Option<&FieldDef> {
    self.fields.iter().find(|f| f.key == key)
  }

  /// Placeholder module for identifiers the catalog does not know.
  pub fn generic(key: &str) -> Self {
    Self {
      key: key.to_string(),
      label: prettify_key(key),
      description: Some("Generic module (not registered in the catalog)".to_string()),
      storage_key: Some(key.to_string()),
      fields: vec![FieldDef::new("name", "Name", FieldKind::Text).required()],
    }
  }
}

/// Turn `animal_create` into `Animal Create`.
pub fn prettify_key(key: &str) -> String {
  key
    .replace('_', " ")
    .split(' ')
    .map(|word| {
      let mut chars = word.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join(" ")
}

/// The set of known modules, by key.
#[derive(Debug, Clone)]
pub struct Catalog {
  modules: BTreeMap<String, ModuleDef>,
}

impl Catalog {
  /// Catalog with the modules every installation ships with.
  pub fn builtin() -> Self {
    let modules = [animal_create(), vaccine(), animal_edit()]
      .into_iter()
      .map(|m| (m.key.clone(), m))
      .collect();

    Self { modules }
  }

  /// Add or replace modules, e.g. from configuration.
  pub fn with_modules(mut self, extra: impl IntoIterator<Item = ModuleDef>) -> Self {
    for module in extra {
      self.modules.insert(module.key.clone(), module);
    }
    self
  }

  pub fn get(&self, key: &str) -> Option<&ModuleDef> {
    self.modules.get(key)
  }

  /// Look up a module, falling back to a generic one for unknown keys.
  pub fn resolve(&self, key: &str) -> ModuleDef {
    self
      .get(key)
      .cloned()
      .unwrap_or_else(|| ModuleDef::generic(key))
  }

  /// Resolve a selection of module keys, preserving order.
  pub fn build(&self, keys: &[String]) -> Vec<ModuleDef> {
    keys.iter().map(|k| self.resolve(k)).collect()
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.modules.keys().map(String::as_str)
  }
}

fn animal_create() -> ModuleDef {
  ModuleDef {
    key: "animal_create".to_string(),
    label: "Create Animal".to_string(),
    description: Some("Offline animal registration".to_string()),
    storage_key: Some("animals".to_string()),
    fields: vec![
      FieldDef::new("identification", "Ear tag / Identification", FieldKind::Text).required(),
      FieldDef::new(
        "sex",
        "Sex",
        FieldKind::Select(vec![
          SelectOption::new("", "Select…"),
          SelectOption::new("M", "Male"),
          SelectOption::new("F", "Female"),
        ]),
      ),
      FieldDef::new("birth_date", "Birth date", FieldKind::Date),
      FieldDef::new("notes", "Notes", FieldKind::Textarea),
    ],
  }
}

fn vaccine() -> ModuleDef {
  ModuleDef {
    key: "vaccine".to_string(),
    label: "Vaccination".to_string(),
    description: Some("Offline vaccination log".to_string()),
    storage_key: Some("vaccinations".to_string()),
    fields: vec![
      FieldDef::new("animal_identification", "Animal ear tag", FieldKind::Text).required(),
      FieldDef::new("vaccine_name", "Vaccine", FieldKind::Text).required(),
      FieldDef::new("date", "Date", FieldKind::Date).required(),
      FieldDef::new("dose", "Dose", FieldKind::Text),
      FieldDef::new("notes", "Notes", FieldKind::Textarea),
    ],
  }
}

fn animal_edit() -> ModuleDef {
  ModuleDef {
    key: "animal_edit".to_string(),
    label: "Edit Animal".to_string(),
    description: Some("Notes appended to an existing animal".to_string()),
    storage_key: Some("animal_edits".to_string()),
    fields: vec![
      FieldDef::new("identification", "Ear tag (target)", FieldKind::Text).required(),
      FieldDef::new("new_notes", "New note", FieldKind::Textarea).required(),
    ],
  }
}
