mod app;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dashsync")]
#[command(about = "Offline-tolerant key/value sync against a dashboard API")]
#[command(version)]
pub struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dashsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Remote API base URL, overriding the config file
  #[arg(long, global = true)]
  api_url: Option<String>,

  /// Use an in-process remote instead of the configured one
  #[arg(long, global = true)]
  offline_remote: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Print the value stored under a key
  Get { key: String },
  /// Store a value; parsed as JSON, otherwise kept as a string
  Set { key: String, value: String },
  /// Delete a key
  Delete { key: String },
  /// List known keys
  Keys,
  /// Show device id, pending writes and remote health
  Status,
  /// Push pending writes now
  Sync,
  /// Show the remote sync log
  Log {
    #[arg(short, long, default_value_t = 50)]
    limit: usize,
  },
  /// Delete every record, locally and remotely
  Clear,
  /// Keep syncing and print changes from other instances until Ctrl-C
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _guard = if args.log_stderr {
    logging::init_stderr_logging()?;
    None
  } else {
    Some(logging::init_file_logging()?)
  };

  let config = dashsync::config::Config::load(args.config.as_deref())?.with_api_url(args.api_url.clone());

  let app = app::App::new(config, args.offline_remote).await?;
  app.run(args.command).await?;

  Ok(())
}
