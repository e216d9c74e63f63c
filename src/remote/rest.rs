use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::traits::RemoteStore;
use super::types::{
  BatchItem, BatchRequest, BatchResponse, DeleteRequest, ErrorBody, HealthReport, ItemFailure,
  RecordWrite, RemoteRecord, SaveRequest, SyncLogEntry,
};
use crate::codec::wire_value;
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::identity::DeviceId;

/// Client for the dashboard data REST API
#[derive(Clone)]
pub struct RestRemote {
  http: reqwest::Client,
  base: Url,
  health: Url,
}

impl RestRemote {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let base = Url::parse(&config.api_url)
      .map_err(|e| eyre!("Invalid API URL {}: {}", config.api_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("API URL {} cannot be used as a base", config.api_url));
    }

    let health = match &config.health_url {
      Some(url) => Url::parse(url).map_err(|e| eyre!("Invalid health URL {}: {}", url, e))?,
      None => join(&base, &["health"]),
    };

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base, health })
  }

  fn data_url(&self, key: Option<&str>) -> Url {
    match key {
      Some(key) => join(&self.base, &["data", key]),
      None => join(&self.base, &["data"]),
    }
  }
}

/// Append path segments to `base`, percent-encoding each one.
fn join(base: &Url, segments: &[&str]) -> Url {
  let mut url = base.clone();
  if let Ok(mut path) = url.path_segments_mut() {
    path.pop_if_empty().extend(segments);
  }
  url
}

/// Turn a non-success response into an error, keeping the server's message.
async fn failure(response: Response) -> RemoteError {
  let status = response.status();
  let message = match response.json::<ErrorBody>().await {
    Ok(body) => body.error,
    Err(_) => status
      .canonical_reason()
      .unwrap_or("request failed")
      .to_string(),
  };
  RemoteError::status(status.as_u16(), message)
}

#[async_trait]
impl RemoteStore for RestRemote {
  async fn save(&self, write: &RecordWrite) -> Result<(), RemoteError> {
    let value = wire_value(&write.value);
    let body = SaveRequest {
      key: &write.key,
      value: &value,
      device_id: write.updated_by.as_str(),
      updated_at: write.updated_at,
    };

    let response = self.http.post(self.data_url(None)).json(&body).send().await?;
    if !response.status().is_success() {
      return Err(failure(response).await);
    }
    Ok(())
  }

  async fn save_batch(
    &self,
    writes: &[RecordWrite],
    device_id: &DeviceId,
  ) -> Result<Vec<ItemFailure>, RemoteError> {
    let values: Vec<Value> = writes.iter().map(|w| wire_value(&w.value)).collect();
    let body = BatchRequest {
      items: writes
        .iter()
        .zip(&values)
        .map(|(w, value)| BatchItem {
          key: &w.key,
          value,
          updated_at: w.updated_at,
        })
        .collect(),
      device_id: device_id.as_str(),
    };

    let response = self
      .http
      .post(join(&self.base, &["data", "batch"]))
      .json(&body)
      .send()
      .await?;

    match response.status() {
      StatusCode::MULTI_STATUS => {
        let result: BatchResponse = response.json().await?;
        if result.success || !result.errors.is_empty() {
          Ok(result.errors)
        } else {
          Err(RemoteError::decode(
            "partial batch response without item errors",
          ))
        }
      }
      status if status.is_success() => Ok(Vec::new()),
      _ => Err(failure(response).await),
    }
  }

  async fn load(&self, key: &str) -> Result<Option<RemoteRecord>, RemoteError> {
    let response = self.http.get(self.data_url(Some(key))).send().await?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !response.status().is_success() {
      return Err(failure(response).await);
    }

    Ok(Some(response.json().await?))
  }

  async fn load_all(&self) -> Result<BTreeMap<String, Value>, RemoteError> {
    let response = self.http.get(self.data_url(None)).send().await?;
    if !response.status().is_success() {
      return Err(failure(response).await);
    }
    Ok(response.json().await?)
  }

  async fn delete(&self, key: &str, device_id: &DeviceId) -> Result<(), RemoteError> {
    let body = DeleteRequest {
      device_id: device_id.as_str(),
    };

    let response = self
      .http
      .delete(self.data_url(Some(key)))
      .json(&body)
      .send()
      .await?;

    // Already gone counts as deleted
    if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
      Ok(())
    } else {
      Err(failure(response).await)
    }
  }

  async fn health(&self) -> Result<HealthReport, RemoteError> {
    let response = self.http.get(self.health.clone()).send().await?;
    if !response.status().is_success() {
      return Err(failure(response).await);
    }

    let report: HealthReport = response.json().await?;
    if !report.is_ok() {
      return Err(RemoteError::store(format!(
        "health status is {}",
        report.status
      )));
    }
    Ok(report)
  }

  async fn sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>, RemoteError> {
    let mut url = join(&self.base, &["sync-log"]);
    url
      .query_pairs_mut()
      .append_pair("limit", &limit.to_string());

    let response = self.http.get(url).send().await?;
    if !response.status().is_success() {
      return Err(failure(response).await);
    }
    Ok(response.json().await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn remote(api_url: &str, health_url: Option<&str>) -> RestRemote {
    RestRemote::new(&RemoteConfig {
      api_url: api_url.to_string(),
      health_url: health_url.map(String::from),
      ..RemoteConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn keys_are_encoded_as_one_segment() {
    let r = remote("http://localhost:3001/api/dashboard", None);
    assert_eq!(
      r.data_url(Some("facility/beds 1")).as_str(),
      "http://localhost:3001/api/dashboard/data/facility%2Fbeds%201"
    );
  }

  #[test]
  fn trailing_slash_on_base_is_tolerated() {
    let r = remote("http://localhost:3001/api/dashboard/", None);
    assert_eq!(
      r.data_url(None).as_str(),
      "http://localhost:3001/api/dashboard/data"
    );
    assert_eq!(r.health.as_str(), "http://localhost:3001/api/dashboard/health");
  }

  #[test]
  fn explicit_health_url_wins() {
    let r = remote(
      "http://localhost:3001/api/dashboard",
      Some("http://localhost:3001/api/health"),
    );
    assert_eq!(r.health.as_str(), "http://localhost:3001/api/health");
  }

  #[test]
  fn rejects_non_base_urls() {
    let config = RemoteConfig {
      api_url: "mailto:someone@example.com".to_string(),
      ..RemoteConfig::default()
    };
    assert!(RestRemote::new(&config).is_err());
  }
}
