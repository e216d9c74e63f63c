use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::remote::{MemoryRemote, RemoteStore, RestRemote, SupabaseRemote};
use crate::store::{DurableLocalStore, KeyValueStore, DEFAULT_CAPACITY};
use crate::sync::{SyncOptions, DEFAULT_CHANNEL, DEFAULT_NAMESPACE};

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api/dashboard";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub remote: RemoteConfig,
  pub sync: SyncSettings,
  pub local: LocalConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
  /// HTTP API exposing the /data, /sync-log and /health routes
  #[default]
  Rest,
  /// Supabase project, talked to through PostgREST
  Supabase,
  /// In-process store; nothing leaves the machine
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
  pub kind: RemoteKind,
  pub api_url: String,
  /// Liveness endpoint (defaults to `<api_url>/health`)
  pub health_url: Option<String>,
  /// Project URL, e.g. https://abc.supabase.co
  pub supabase_url: Option<String>,
  pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self {
      kind: RemoteKind::default(),
      api_url: DEFAULT_API_URL.to_string(),
      health_url: None,
      supabase_url: None,
      request_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
  /// Seconds between automatic retries of pending writes
  pub interval_secs: u64,
  /// Broadcast channel shared by every tab
  pub channel: String,
  /// Prefix for local store keys
  pub namespace: String,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      channel: DEFAULT_CHANNEL.to_string(),
      namespace: DEFAULT_NAMESPACE.to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
  /// SQLite file (defaults to the platform data dir)
  pub path: Option<PathBuf>,
  pub capacity_bytes: usize,
}

impl Default for LocalConfig {
  fn default() -> Self {
    Self {
      path: None,
      capacity_bytes: DEFAULT_CAPACITY,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dashsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dashsync/config.yaml
  ///
  /// With no file anywhere the defaults are used. `DASHSYNC_API_URL`
  /// overrides `remote.api_url` either way.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    Ok(config.with_api_url(std::env::var("DASHSYNC_API_URL").ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("dashsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dashsync").join("config.yaml");
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

  /// Replace the API URL when `url` is set.
  pub fn with_api_url(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.is_empty()) {
      self.remote.api_url = url;
    }
    self
  }

  /// Get the Supabase key from environment variables.
  ///
  /// Checks DASHSYNC_SUPABASE_KEY first, then SUPABASE_KEY as fallback.
  pub fn get_supabase_key() -> Result<String> {
    std::env::var("DASHSYNC_SUPABASE_KEY")
      .or_else(|_| std::env::var("SUPABASE_KEY"))
      .map_err(|_| {
        eyre!("Supabase key not found. Set DASHSYNC_SUPABASE_KEY or SUPABASE_KEY environment variable.")
      })
  }

  /// Build the configured remote store.
  pub fn remote_store(&self) -> Result<Arc<dyn RemoteStore>> {
    let remote: Arc<dyn RemoteStore> = match self.remote.kind {
      RemoteKind::Rest => Arc::new(RestRemote::new(&self.remote)?),
      RemoteKind::Supabase => {
        let key = Self::get_supabase_key()?;
        Arc::new(SupabaseRemote::new(&self.remote, &key)?)
      }
      RemoteKind::Memory => Arc::new(MemoryRemote::default()),
    };
    Ok(remote)
  }

  /// Open the durable local store.
  pub fn local_store(&self) -> Result<Arc<dyn KeyValueStore>> {
    let store = DurableLocalStore::open(self.local.path.as_deref(), self.local.capacity_bytes)
      .map_err(|e| eyre!("Failed to open local store: {}", e))?;
    Ok(Arc::new(store))
  }

  pub fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      sync_interval: Duration::from_secs(self.sync.interval_secs.max(1)),
      channel: self.sync.channel.clone(),
      namespace: self.sync.namespace.clone(),
    }
  }
}
