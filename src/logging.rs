use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "dashsync=info";
const MAX_LOG_FILES: usize = 7;

fn filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to daily files under the data dir.
///
/// Keep the returned guard alive for the whole run, or buffered lines are
/// lost on exit.
pub fn init_file_logging() -> Result<non_blocking::WorkerGuard> {
  let logs_dir = logs_dir()?;
  let appender = rolling::Builder::new()
    .rotation(rolling::Rotation::DAILY)
    .max_log_files(MAX_LOG_FILES)
    .filename_prefix("dashsync")
    .filename_suffix("log")
    .build(&logs_dir)
    .map_err(|e| eyre!("Failed to open log dir {}: {}", logs_dir.display(), e))?;
  let (writer, guard) = non_blocking(appender);

  let layer = fmt::layer()
    .with_ansi(false)
    .with_line_number(true)
    .with_writer(writer)
    .with_filter(filter());
  tracing_subscriber::registry()
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;
  Ok(guard)
}

pub fn init_stderr_logging() -> Result<()> {
  let layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(filter());
  tracing_subscriber::registry()
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;
  Ok(())
}

fn logs_dir() -> Result<PathBuf> {
  dirs::data_dir()
    .map(|d| d.join("dashsync").join("logs"))
    .ok_or_else(|| eyre!("Could not determine data directory"))
}
