use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `debug`, `offline_builder=trace`).
pub const LOG_ENV: &str = "OFFLINE_BUILDER_LOG";

/// Send logs to a daily rolling file under `<data_dir>/logs`, keeping stdout
/// for command output. Keep the returned guard alive until exit.
pub fn init(data_dir: &Path) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "offline-builder.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter("info"))
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(guard)
}

/// Log warnings and errors to stderr, for when the log directory is unusable.
pub fn init_stderr() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter("warn"))
    .with_writer(std::io::stderr)
    .try_init();
}

fn filter(default: &str) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_fails_when_data_dir_is_unusable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let err = init(&blocker.join("data")).unwrap_err();
    assert!(err.to_string().contains("Failed to create log directory"));
  }
}
