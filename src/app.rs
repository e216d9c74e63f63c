use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::Command;
use dashsync::broadcast::ChangeKind;
use dashsync::cache::ReadSource;
use dashsync::config::Config;
use dashsync::remote::{Availability, MemoryRemote, RemoteStore, SyncAction};
use dashsync::sync::{FlushOutcome, SyncParts, SyncService, WriteOutcome};

/// One CLI invocation: a service wired from config, plus the command to run.
pub struct App {
  service: Arc<SyncService>,
}

impl App {
  pub async fn new(config: Config, offline_remote: bool) -> Result<Self> {
    let remote: Arc<dyn RemoteStore> = if offline_remote {
      Arc::new(MemoryRemote::default())
    } else {
      config.remote_store()?
    };
    let local = config.local_store()?;

    let service = SyncService::new(
      SyncParts::new(remote).with_local(local),
      config.sync_options(),
    );
    let report = service.initialize().await;
    if report.source == ReadSource::Offline {
      eprintln!("Remote unreachable, working from the local copy");
    }

    Ok(Self {
      service: Arc::new(service),
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Get { key } => self.get(&key).await,
      Command::Set { key, value } => self.set(&key, &value).await,
      Command::Delete { key } => {
        let outcome = self.service.delete(&key).await?;
        print_outcome("deleted", &key, &outcome);
        Ok(())
      }
      Command::Keys => {
        for key in self.service.keys() {
          println!("{}", key);
        }
        Ok(())
      }
      Command::Status => self.status().await,
      Command::Sync => self.sync().await,
      Command::Log { limit } => self.log(limit).await,
      Command::Clear => {
        let report = self.service.clear().await;
        println!(
          "Cleared {} record(s), {} still pending",
          report.confirmed.len(),
          report.failed.len()
        );
        Ok(())
      }
      Command::Watch => self.watch().await,
    }
  }

  async fn get(&self, key: &str) -> Result<()> {
    let fetched = self.service.fetch(key).await;
    match fetched.data {
      Some(value) => {
        let text = serde_json::to_string_pretty(&value)
          .map_err(|e| eyre!("Failed to format value: {}", e))?;
        println!("{}", text);
        if fetched.source == ReadSource::Offline {
          eprintln!("(offline copy)");
        }
        Ok(())
      }
      None => Err(eyre!("Key not found: {}", key)),
    }
  }

  async fn set(&self, key: &str, raw: &str) -> Result<()> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    let outcome = self.service.set(key, value).await?;
    print_outcome("saved", key, &outcome);
    Ok(())
  }

  async fn status(&self) -> Result<()> {
    self.service.check_health().await;
    let health = self.service.health();
    let remote = match health.availability {
      Availability::Online => "online".to_string(),
      Availability::Offline => format!("offline ({})", health.detail.unwrap_or_default()),
      Availability::Unknown => "unknown".to_string(),
    };

    println!("Device:  {}", self.service.device_id());
    println!("Records: {}", self.service.len());
    println!("Pending: {}", self.service.pending_count());
    println!("Remote:  {}", remote);
    Ok(())
  }

  async fn sync(&self) -> Result<()> {
    match self.service.sync_now().await {
      FlushOutcome::Idle => println!("Nothing to sync"),
      FlushOutcome::Busy => println!("A sync is already running"),
      FlushOutcome::Flushed(report) => {
        println!("Synced {} change(s)", report.confirmed.len());
        for failure in &report.failed {
          println!("  {}: {}", failure.key, failure.error);
        }
      }
    }
    Ok(())
  }

  async fn log(&self, limit: usize) -> Result<()> {
    let entries = self
      .service
      .sync_log(limit)
      .await
      .map_err(|e| eyre!("Failed to load sync log: {}", e))?;
    for entry in entries {
      let action = match entry.action {
        SyncAction::Save => "save",
        SyncAction::Delete => "delete",
        SyncAction::BatchSave => "batch_save",
      };
      println!(
        "{}  {:<10} {:<24} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        action,
        entry.key,
        entry.device_id
      );
    }
    Ok(())
  }

  async fn watch(&self) -> Result<()> {
    let mut auto_sync = self.service.start_auto_sync();
    let mut feed = self.service.subscribe();
    info!(tab = %self.service.tab_id(), "watching for changes");
    println!("Watching for changes, Ctrl-C to stop");

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        message = feed.next() => {
          let Some(message) = message else { break };
          if self.service.apply_change(&message) {
            let verb = match message.kind {
              ChangeKind::Created => "created",
              ChangeKind::Updated => "updated",
              ChangeKind::Deleted => "deleted",
            };
            println!("{} {} by {}", verb, message.key, message.updated_by);
          }
        }
      }
    }

    auto_sync.stop();
    Ok(())
  }
}

fn print_outcome(verb: &str, key: &str, outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Synced => println!("{} {}", verb, key),
    WriteOutcome::Queued(e) => println!("{} {} locally, remote sync pending ({})", verb, key, e),
  }
}
