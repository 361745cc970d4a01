use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::forms::{Catalog, ModuleDef};
use crate::worker::ShellManifest;

/// Environment variable overriding where stores and logs live.
pub const DATA_DIR_ENV: &str = "OFFLINE_BUILDER_DATA_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Title shown by `modules`
  pub title: Option<String>,
  /// Where the stores and logs live (default: $XDG_DATA_HOME/offline-builder)
  pub data_dir: Option<PathBuf>,
  /// Selection used when none is given and none is remembered
  pub default_modules: Vec<String>,
  /// Extra catalog entries; replace built-in modules with the same key
  pub modules: Vec<ModuleDef>,
  pub worker: WorkerConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      title: None,
      data_dir: None,
      default_modules: vec!["animal_create".to_string()],
      modules: Vec::new(),
      worker: WorkerConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Cache name; bump it whenever the shell assets change
  pub cache_version: String,
  /// Base URL the shell is served from
  pub scope: String,
  /// Shell asset paths, relative to `scope`
  pub shell: Vec<String>,
  /// Document served for navigations while offline
  pub entry_document: String,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      cache_version: "offline-builder-v2".to_string(),
      scope: "http://localhost:8080/".to_string(),
      shell: ["./", "./index.html", "./app.js", "./idb.js", "./manifest.json"]
        .into_iter()
        .map(String::from)
        .collect(),
      entry_document: "./index.html".to_string(),
    }
  }
}

impl WorkerConfig {
  pub fn manifest(&self) -> Result<ShellManifest> {
    let scope = Url::parse(&self.scope)
      .map_err(|e| eyre!("Invalid worker scope '{}': {}", self.scope, e))?;

    Ok(ShellManifest {
      version: self.cache_version.clone(),
      scope,
      assets: self.shell.clone(),
      entry_document: self.entry_document.clone(),
    })
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-builder.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-builder/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-builder.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-builder").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolve the data directory: environment, then config, then platform default.
  pub fn data_dir(&self) -> Result<PathBuf> {
    resolve_data_dir(
      std::env::var_os(DATA_DIR_ENV).map(PathBuf::from),
      self.data_dir.clone(),
      dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share"))),
    )
  }

  /// Built-in modules with the configured ones layered on top.
  pub fn catalog(&self) -> Catalog {
    Catalog::builtin().with_modules(self.modules.iter().cloned())
  }
}

fn resolve_data_dir(
  from_env: Option<PathBuf>,
  configured: Option<PathBuf>,
  platform: Option<PathBuf>,
) -> Result<PathBuf> {
  from_env
    .filter(|p| !p.as_os_str().is_empty())
    .or(configured)
    .or_else(|| platform.map(|p| p.join("offline-builder")))
    .ok_or_else(|| eyre!("Could not determine data directory; set {}", DATA_DIR_ENV))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file() {
    let config = Config::default();

    assert_eq!(config.default_modules, vec!["animal_create".to_string()]);
    assert_eq!(config.worker.cache_version, "offline-builder-v2");
    assert_eq!(config.worker.shell.len(), 5);

    let manifest = config.worker.manifest().unwrap();
    assert_eq!(
      manifest.entry_url().unwrap().as_str(),
      "http://localhost:8080/index.html"
    );
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("absent.yaml"))).is_err());
  }

  #[test]
  fn test_load_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
      &path,
      r#"
title: Farm 12
worker:
  cache_version: farm-v7
  scope: https://farm.example/app/
modules:
  - key: weighing
    label: Weighing
    storage_key: weights
    fields:
      - { key: animal, required: true }
      - { key: weight, type: number }
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();

    assert_eq!(config.title.as_deref(), Some("Farm 12"));
    assert_eq!(config.worker.cache_version, "farm-v7");
    assert_eq!(config.worker.entry_document, "./index.html");
    assert_eq!(config.default_modules, vec!["animal_create".to_string()]);

    let manifest = config.worker.manifest().unwrap();
    assert_eq!(
      manifest.asset_urls().unwrap()[2].as_str(),
      "https://farm.example/app/app.js"
    );

    let catalog = config.catalog();
    assert_eq!(catalog.resolve("weighing").storage_key(), "weights");
    assert_eq!(catalog.resolve("vaccine").storage_key(), "vaccinations");
  }

  #[test]
  fn test_invalid_scope_is_reported() {
    let worker = WorkerConfig {
      scope: "not a url".to_string(),
      ..WorkerConfig::default()
    };
    assert!(worker.manifest().is_err());
  }

  #[test]
  fn test_data_dir_precedence() {
    let env = Some(PathBuf::from("/env"));
    let configured = Some(PathBuf::from("/configured"));
    let platform = Some(PathBuf::from("/platform"));

    assert_eq!(
      resolve_data_dir(env, configured.clone(), platform.clone()).unwrap(),
      PathBuf::from("/env")
    );
    assert_eq!(
      resolve_data_dir(Some(PathBuf::new()), configured.clone(), platform.clone()).unwrap(),
      PathBuf::from("/configured")
    );
    assert_eq!(
      resolve_data_dir(None, None, platform).unwrap(),
      PathBuf::from("/platform/offline-builder")
    );
    assert!(resolve_data_dir(None, None, None).is_err());
  }
}
