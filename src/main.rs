mod commands;
mod config;
mod forms;
mod logging;
mod store;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "offline-builder")]
#[command(about = "Offline data entry: local drafts, append-only records and a cached app shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-builder/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Comma-separated modules to work with, e.g. animal_create,vaccine (remembered for later runs)
  #[arg(short, long)]
  modules: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;

  let _log_guard = match logging::init(&data_dir) {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("Notice: {}; logging to stderr instead.", e);
      logging::init_stderr();
      None
    }
  };
  tracing::debug!(data_dir = %data_dir.display(), "starting");

  let ctx = commands::Context {
    config,
    data_dir,
    modules: args.modules,
    invocation: std::env::args().collect::<Vec<_>>().join(" "),
  };

  commands::run(args.command, &ctx).await
}
