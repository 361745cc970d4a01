//! Which modules a session shows, remembered across runs.

use serde_json::Value;
use tracing::debug;

use crate::store::{Partition, Result, Store};

/// Meta key holding the last module selection.
pub const LAST_MODULES_KEY: &str = "lastModules";
/// Meta key holding the invocation that produced the last explicit selection.
pub const LAST_SOURCE_KEY: &str = "lastModulesUrl";

/// Split a comma-separated module list, trimming and dropping blanks.
pub fn parse_module_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// Where a resolved selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
  Explicit,
  Remembered,
  Default,
}

/// Resolve the module selection for this run.
///
/// 1. An explicit, non-empty list wins and is remembered along with `invocation`
/// 2. Otherwise the remembered list, if it is a non-empty list of strings
/// 3. Otherwise `fallback`
///
/// The resolved list is always written back as the remembered selection.
pub fn resolve_selection<S: Store>(
  store: &S,
  explicit: Option<&str>,
  invocation: &str,
  fallback: &[String],
) -> Result<(Vec<String>, SelectionSource)> {
  let explicit = explicit.map(parse_module_list).filter(|keys| !keys.is_empty());

  let (keys, source) = match explicit {
    Some(keys) => {
      store.set(Partition::Meta, LAST_SOURCE_KEY, &Value::from(invocation))?;
      (keys, SelectionSource::Explicit)
    }
    None => match remembered(store)? {
      Some(keys) => (keys, SelectionSource::Remembered),
      None => (fallback.to_vec(), SelectionSource::Default),
    },
  };

  store.set_json(Partition::Meta, LAST_MODULES_KEY, &keys)?;
  debug!(?keys, ?source, "module selection resolved");

  Ok((keys, source))
}

/// The remembered selection. Anything other than a non-empty list of strings
/// counts as nothing remembered.
fn remembered<S: Store>(store: &S) -> Result<Option<Vec<String>>> {
  let keys = match store.get(Partition::Meta, LAST_MODULES_KEY)? {
    Some(Value::Array(items)) => items
      .into_iter()
      .map(|v| v.as_str().map(String::from))
      .collect::<Option<Vec<String>>>(),
    _ => None,
  };

  Ok(keys.filter(|k| !k.is_empty()))
}
