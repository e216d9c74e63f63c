//! Remote store on a hosted PostgREST database (Supabase).
//!
//! Talks to two tables: `dashboard_data` (unique `key`, text `value`,
//! `updated_at`, `updated_by`) and the append-only `sync_log`.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;
use url::Url;

use super::traits::RemoteStore;
use super::types::{
  DataRow, HealthReport, ItemFailure, LogRow, RecordWrite, RemoteRecord, StoredRow, SyncAction,
  SyncLogEntry,
};
use crate::codec::{decode_json, encode_value};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::identity::DeviceId;

const DATA_TABLE: &str = "dashboard_data";
const LOG_TABLE: &str = "sync_log";

#[derive(Clone)]
pub struct SupabaseRemote {
  http: reqwest::Client,
  rest: Url,
}

impl SupabaseRemote {
  pub fn new(config: &RemoteConfig, api_key: &str) -> Result<Self> {
    let project_url = config
      .supabase_url
      .as_deref()
      .ok_or_else(|| eyre!("remote.supabase_url is required for the supabase remote"))?;

    let mut rest = Url::parse(project_url)
      .map_err(|e| eyre!("Invalid Supabase URL {}: {}", project_url, e))?;
    rest
      .path_segments_mut()
      .map_err(|_| eyre!("Supabase URL {} cannot be used as a base", project_url))?
      .pop_if_empty()
      .extend(["rest", "v1"]);

    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid Supabase key: {}", e))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
      .map_err(|e| eyre!("Invalid Supabase key: {}", e))?;
    headers.insert("apikey", key);
    headers.insert(AUTHORIZATION, bearer);

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, rest })
  }

  fn table(&self, name: &str) -> Url {
    let mut url = self.rest.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.push(name);
    }
    url
  }

  async fn upsert(&self, write: &RecordWrite) -> Result<(), RemoteError> {
    let row = DataRow {
      key: &write.key,
      value: encode_value(&write.value),
      updated_at: write.updated_at,
      updated_by: write.updated_by.as_str(),
    };

    let mut url = self.table(DATA_TABLE);
    url.query_pairs_mut().append_pair("on_conflict", "key");
    let request = self
      .http
      .post(url)
      .header("Prefer", "resolution=merge-duplicates,return=minimal")
      .json(&[row]);
    send(request).await.map(|_| ())
  }

  /// Append to the sync log. The write itself already succeeded, so a
  /// failure here is only logged.
  async fn append_log(&self, action: SyncAction, key: &str, device_id: &str) {
    let row = LogRow {
      action,
      key,
      device_id,
    };
    let request = self
      .http
      .post(self.table(LOG_TABLE))
      .header("Prefer", "return=minimal")
      .json(&row);
    if let Err(e) = send(request).await {
      warn!(key, error = %e, "failed to append sync log entry");
    }
  }
}

async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
  let response = request.send().await?;
  if response.status().is_success() {
    return Ok(response);
  }

  let status = response.status().as_u16();
  // PostgREST errors carry a `message` field
  let message = response
    .json::<Value>()
    .await
    .ok()
    .and_then(|body| body.get("message").and_then(Value::as_str).map(String::from))
    .unwrap_or_else(|| format!("request failed with status {}", status));
  Err(RemoteError::status(status, message))
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
  async fn save(&self, write: &RecordWrite) -> Result<(), RemoteError> {
    self.upsert(write).await?;
    self
      .append_log(SyncAction::Save, &write.key, write.updated_by.as_str())
      .await;
    Ok(())
  }

  async fn save_batch(
    &self,
    writes: &[RecordWrite],
    device_id: &DeviceId,
  ) -> Result<Vec<ItemFailure>, RemoteError> {
    let results = join_all(writes.iter().map(|write| async move {
      match self.upsert(write).await {
        Ok(()) => {
          self
            .append_log(SyncAction::BatchSave, &write.key, device_id.as_str())
            .await;
          None
        }
        Err(e) => Some(ItemFailure {
          key: write.key.clone(),
          error: e.message,
        }),
      }
    }))
    .await;

    Ok(results.into_iter().flatten().collect())
  }

  async fn load(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteError> {
    let mut url = self.table(DATA_TABLE);
    url
      .query_pairs_mut()
      .append_pair("select", "key,value,updated_at")
      .append_pair("key", &format!("eq.{}", key));

    let rows: Vec<StoredRow> = send(self.http.get(url)).await?.json().await?;
    Ok(rows.into_iter().next().map(|row| RemoteRecord {
      key: row.key,
      value: decode_json(row.value),
      updated_at: row.updated_at,
    }))
  }

  async fn load_all(&self) -> Result<BTreeMap<String, Value>, RemoteError> {
    let mut url = self.table(DATA_TABLE);
    url
      .query_pairs_mut()
      .append_pair("select", "key,value,updated_at");

    let rows: Vec<StoredRow> = send(self.http.get(url)).await?.json().await?;
    Ok(
      rows
        .into_iter()
        .map(|row| (row.key, decode_json(row.value)))
        .collect(),
    )
  }

  async fn delete(&self, key: &str, device_id: &DeviceId) -> Result<(), RemoteError> {
    let mut url = self.table(DATA_TABLE);
    url
      .query_pairs_mut()
      .append_pair("key", &format!("eq.{}", key));

    send(self.http.delete(url)).await?;
    self
      .append_log(SyncAction::Delete, key, device_id.as_str())
      .await;
    Ok(())
  }

  async fn health(&self) -> Result<HealthReport, RemoteError> {
    let mut url = self.table(DATA_TABLE);
    url
      .query_pairs_mut()
      .append_pair("select", "key")
      .append_pair("limit", "1");

    send(self.http.get(url)).await?;
    Ok(HealthReport {
      status: "ok".to_string(),
      timestamp: Some(chrono::Utc::now().to_rfc3339()),
    })
  }

  async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError> {
    let mut url = self.table(LOG_TABLE);
    url
      .query_pairs_mut()
      .append_pair("select", "action,key,timestamp,device_id")
      .append_pair("order", "timestamp.desc")
      .append_pair("limit", &limit.to_string());

    Ok(send(self.http.get(url)).await?.json().await?)
  }
}
