//! Subcommands and their dispatch.

use clap::Subcommand;
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::forms::{
  resolve_selection, AppState, FieldValues, FormService, ModuleDef, SelectionSource, RECENT_LIMIT,
};
use crate::store::{Partition, SqliteStore, Store, StoreError};
use crate::worker::{
  AssetCache, AssetRequest, EventOutcome, FetchOutcome, Fetcher, HttpFetcher, SqliteAssetCache,
  Worker, WorkerEvent,
};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Show the selected modules with their draft and record counts
  Modules,
  /// Inspect or edit a module's draft
  Draft {
    #[command(subcommand)]
    action: DraftAction,
  },
  /// Validate the module's form and save it as a record
  Save {
    module: String,
    /// Field values, as key=value (merged over the draft)
    #[arg(value_parser = parse_assignment)]
    values: Vec<(String, String)>,
  },
  /// List the newest records saved for a module
  Records {
    module: String,
    #[arg(short, long, default_value_t = RECENT_LIMIT)]
    limit: usize,
  },
  /// Local store maintenance
  Store {
    #[command(subcommand)]
    action: StoreAction,
  },
  /// Offline asset cache
  Worker {
    #[command(subcommand)]
    action: WorkerAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum DraftAction {
  /// Print the form as the draft left it
  Show { module: String },
  /// Change fields; the whole form is saved as the new draft
  Set {
    module: String,
    #[arg(value_parser = parse_assignment, required = true)]
    values: Vec<(String, String)>,
  },
  /// Discard the draft
  Reset { module: String },
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
  /// List keys in a partition (meta, drafts, records)
  Keys { partition: Partition },
  /// Remove every key in a partition
  Clear { partition: Partition },
}

#[derive(Subcommand, Debug)]
pub enum WorkerAction {
  /// Fetch the shell into a new cache version without activating it
  Install,
  /// Activate the installed version and evict all other caches
  Activate,
  /// Install and immediately activate
  Update,
  /// Request a URL through the active worker
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Show the active version and cached entries
  Status,
}

/// Everything a command needs from the command line and configuration.
pub struct Context {
  pub config: Config,
  pub data_dir: PathBuf,
  /// Raw `--modules` value, if given
  pub modules: Option<String>,
  /// The command line, remembered alongside an explicit selection
  pub invocation: String,
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
  let (key, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
  let key = key.trim();
  if key.is_empty() {
    return Err(format!("missing field name in '{}'", s));
  }
  Ok((key.to_string(), value.to_string()))
}

pub async fn run(command: Command, ctx: &Context) -> Result<()> {
  match command {
    Command::Worker { action } => run_worker(action, ctx).await,
    Command::Store { action } => run_store(action, ctx),
    other => run_forms(other, ctx),
  }
}

/// Open the local store for writing. Failure is fatal.
fn open_store(ctx: &Context) -> Result<Arc<SqliteStore>> {
  let store = SqliteStore::open(&ctx.data_dir).wrap_err("Local store unavailable")?;
  Ok(Arc::new(store))
}

/// Open the local store for a read-only command, degrading to an empty
/// throwaway store when persistence is unavailable.
fn open_store_for_reading(ctx: &Context) -> Result<Arc<SqliteStore>> {
  match SqliteStore::open(&ctx.data_dir) {
    Ok(store) => Ok(Arc::new(store)),
    Err(e @ StoreError::Unavailable { .. }) => {
      warn!(error = %e, "local store unavailable, continuing without persistence");
      eprintln!("Notice: {}. Nothing saved earlier can be shown.", e);
      Ok(Arc::new(SqliteStore::open_in_memory()?))
    }
    Err(e) => Err(e.into()),
  }
}

fn run_forms(command: Command, ctx: &Context) -> Result<()> {
  let read_only = matches!(
    command,
    Command::Modules
      | Command::Records { .. }
      | Command::Draft {
        action: DraftAction::Show { .. }
      }
  );
  let store = if read_only {
    open_store_for_reading(ctx)?
  } else {
    open_store(ctx)?
  };

  let (keys, source) = resolve_selection(
    store.as_ref(),
    ctx.modules.as_deref(),
    &ctx.invocation,
    &ctx.config.default_modules,
  )?;
  let mut state = AppState::new(ctx.config.catalog().build(&keys));
  let forms = FormService::new(store);

  match command {
    Command::Modules => show_modules(&state, source, &forms, ctx),
    Command::Draft { action } => match action {
      DraftAction::Show { module } => {
        let module = select(&mut state, &module)?;
        show_form(module, &forms.current_values(module)?);
        Ok(())
      }
      DraftAction::Set { module, values } => {
        let module = select(&mut state, &module)?;
        let draft = forms.edit_draft(module, &values.into_iter().collect())?;
        show_form(module, &draft);
        Ok(())
      }
      DraftAction::Reset { module } => {
        let module = select(&mut state, &module)?;
        forms.reset_draft(module)?;
        println!("Draft for {} cleared.", module.label);
        Ok(())
      }
    },
    Command::Save { module, values } => {
      let module = select(&mut state, &module)?;
      let (record, count) = forms
        .submit(module, &values.into_iter().collect())
        .wrap_err_with(|| format!("Could not save {}", module.label))?;
      println!(
        "Saved offline: {} ({}), {} records in {}.",
        record.title(),
        record.local_id,
        count,
        module.storage_key()
      );
      Ok(())
    }
    Command::Records { module, limit } => {
      let module = select(&mut state, &module)?;
      let records = forms.recent_records(module, limit)?;
      println!("{} ({} total)", module.label, forms.record_count(module)?);
      if records.is_empty() {
        println!("  No local records yet.");
      }
      for record in records {
        let when = record
          .created_at_local()
          .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
          .unwrap_or_else(|| record.created_at.to_string());
        println!("  {:<24} {}  {}", record.title(), when, record.local_id);
      }
      Ok(())
    }
    Command::Store { .. } | Command::Worker { .. } => unreachable!("dispatched in run"),
  }
}

fn select<'a>(state: &'a mut AppState, key: &str) -> Result<&'a ModuleDef> {
  state
    .select(key)
    .wrap_err("Pass --modules to change the selection")
}

fn show_modules(
  state: &AppState,
  source: SelectionSource,
  forms: &FormService<SqliteStore>,
  ctx: &Context,
) -> Result<()> {
  if let Some(title) = &ctx.config.title {
    println!("{}", title);
  }
  let origin = match source {
    SelectionSource::Explicit => "from --modules",
    SelectionSource::Remembered => "remembered",
    SelectionSource::Default => "default",
  };
  println!("Modules ({}):", origin);

  for module in &state.modules {
    let marker = if state.active_module().map(|m| &m.key) == Some(&module.key) {
      "*"
    } else {
      " "
    };
    let drafted = forms
      .load_draft(module)?
      .values()
      .filter(|v| !v.is_empty())
      .count();
    println!(
      "{} {:<16} {:<20} records: {:<5} draft fields: {}",
      marker,
      module.key,
      module.label,
      forms.record_count(module)?,
      drafted
    );
  }

  let catalog = ctx.config.catalog();
  println!("Catalog: {}", catalog.keys().collect::<Vec<_>>().join(", "));
  Ok(())
}

fn show_form(module: &ModuleDef, values: &FieldValues) {
  println!("{}", module.label);
  if let Some(description) = &module.description {
    println!("{}", description);
  }
  for field in &module.fields {
    let required = if field.required { "*" } else { " " };
    let value = values.get(&field.key).map(String::as_str).unwrap_or("");
    println!(
      "  {}{:<24} [{}] {}",
      required,
      field.label,
      field.kind.name(),
      value
    );
  }
}

fn run_store(action: StoreAction, ctx: &Context) -> Result<()> {
  match action {
    StoreAction::Keys { partition } => {
      let store = open_store_for_reading(ctx)?;
      for key in store.keys(partition)? {
        println!("{}", key);
      }
    }
    StoreAction::Clear { partition } => {
      let store = open_store(ctx)?;
      store.clear(partition)?;
      println!("Cleared {}.", partition);
    }
  }
  Ok(())
}

async fn run_worker(action: WorkerAction, ctx: &Context) -> Result<()> {
  let cache = Arc::new(SqliteAssetCache::open(&ctx.data_dir)?);
  let fetcher = Arc::new(HttpFetcher::new()?);
  let manifest = ctx.config.worker.manifest()?;

  match action {
    WorkerAction::Install => {
      let mut worker = Worker::new(cache, fetcher, manifest);
      worker.handle(WorkerEvent::Install).await?;
      println!(
        "Installed {} ({:?}); run `worker activate` to serve it.",
        worker.version(),
        worker.state()
      );
    }
    WorkerAction::Activate => {
      let mut worker = Worker::installed(cache, fetcher, manifest)?;
      worker.handle(WorkerEvent::Activate).await?;
      println!("Activated {}.", worker.version());
    }
    WorkerAction::Update => {
      let mut worker = Worker::new(cache, fetcher, manifest);
      worker.handle(WorkerEvent::Install).await?;
      worker.handle(WorkerEvent::Activate).await?;
      println!("Installed and activated {}.", worker.version());
    }
    WorkerAction::Fetch {
      url,
      navigate,
      output,
    } => {
      let request = if navigate {
        AssetRequest::navigate(url.clone())
      } else {
        AssetRequest::subresource(url.clone())
      };

      let outcome = match cache.active_version()? {
        Some(active) => {
          let mut worker =
            Worker::resume(cache, fetcher.clone(), manifest.with_version(&active))?;
          match worker.handle(WorkerEvent::Fetch(request)).await? {
            EventOutcome::Fetched(outcome) => outcome,
            _ => FetchOutcome::Passthrough,
          }
        }
        None => FetchOutcome::Passthrough,
      };

      let source = match &outcome {
        FetchOutcome::Network(_) => "network",
        FetchOutcome::Cache(_) => "cache",
        FetchOutcome::Fallback(_) => "offline fallback",
        FetchOutcome::Passthrough => "network (not intercepted)",
      };
      let response = match outcome.response() {
        Some(response) => response.clone(),
        None => fetcher.fetch(&url).await?,
      };

      eprintln!(
        "{} {} from {} ({} bytes)",
        response.status,
        url,
        source,
        response.body.len()
      );
      match output {
        Some(path) => std::fs::write(&path, &response.body)
          .wrap_err_with(|| format!("Failed to write {}", path.display()))?,
        None => {
          use std::io::Write;
          std::io::stdout().write_all(&response.body)?;
        }
      }
    }
    WorkerAction::Status => {
      let worker = Worker::resume(cache, fetcher, manifest)?;
      let status = worker.status()?;
      println!(
        "Configured version: {} ({:?})",
        status.version, status.state
      );
      println!(
        "Active version: {}",
        status.active_version.as_deref().unwrap_or("none")
      );
      for (name, entries) in status.caches {
        println!("{} ({} entries)", name, entries.len());
        for entry in entries {
          println!(
            "  {} {:>8}  {}  {}  {}",
            entry.status,
            entry.size,
            &entry.sha256[..12.min(entry.sha256.len())],
            entry.stored_at.format("%Y-%m-%d %H:%M"),
            entry.key
          );
        }
      }
    }
  }

  Ok(())
}
