//! File logging.
//!
//! Logs go to a daily-rotated file under the data directory so they never
//! interleave with command output or the watch screen. `MEDBOOK_LOG` takes an
//! `EnvFilter` directive; the default is `info`.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "MEDBOOK_LOG";

/// Directory log files are written to.
pub fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("medbook").join("logs"))
}

/// Install the global subscriber. Keep the guard alive for the life of the
/// process; dropping it flushes and stops the writer.
pub fn init() -> Result<WorkerGuard> {
  init_in(&log_dir()?)
}

pub fn init_in(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(dir, "medbook.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  tracing::debug!(dir = %dir.display(), "Logging initialized");
  Ok(guard)
}
