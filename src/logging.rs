use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Env var holding the log filter directives
pub const LOG_ENV: &str = "BOARDSYNC_LOG";

/// Route tracing output to a daily-rolling file in `logs_dir`.
///
/// The terminal belongs to the UI, so nothing is written to stdout. Keep the
/// returned guard alive for the life of the process or buffered lines are
/// lost.
pub fn init(logs_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(logs_dir)
    .map_err(|e| eyre!("Failed to create log dir {}: {}", logs_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::Builder::new()
    .rotation(tracing_appender::rolling::Rotation::DAILY)
    .filename_prefix("boardsync")
    .filename_suffix("log")
    .build(logs_dir)
    .map_err(|e| eyre!("Failed to open log file in {}: {}", logs_dir.display(), e))?;

  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(non_blocking)
    .with_ansi(false)
    .with_target(true);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  // A second init (tests, embedding) keeps the first subscriber
  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .try_init()
    .ok();

  Ok(guard)
}
