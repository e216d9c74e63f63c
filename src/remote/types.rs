//! Wire and result types shared by the remote store implementations.
//!
//! The request/response structs match the dashboard data API; they are kept
//! apart from the core types so the core doesn't depend on field spellings.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::identity::DeviceId;

/// One record write as sent to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
  pub key: String,
  pub value: Value,
  pub updated_at: DateTime<Utc>,
  pub updated_by: DeviceId,
}

/// A record as returned by a single-key lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteRecord {
  pub key: String,
  pub value: Value,
  #[serde(default)]
  pub updated_at: Option<String>,
}

/// A write the remote store rejected while accepting the rest of its batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
  pub key: String,
  pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
  Save,
  Delete,
  BatchSave,
}

/// Append-only audit entry kept by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
  pub action: SyncAction,
  pub key: String,
  #[serde(deserialize_with = "deserialize_timestamp")]
  pub timestamp: DateTime<Utc>,
  pub device_id: String,
}

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
  pub status: String,
  #[serde(default)]
  pub timestamp: Option<String>,
}

impl HealthReport {
  pub fn is_ok(&self) -> bool {
    self.status == "ok"
  }
}

// ============================================================================
// REST request/response bodies
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct SaveRequest<'a> {
  pub key: &'a str,
  pub value: &'a Value,
  #[serde(rename = "deviceId")]
  pub device_id: &'a str,
  #[serde(rename = "updatedAt")]
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchItem<'a> {
  pub key: &'a str,
  pub value: &'a Value,
  #[serde(rename = "updatedAt")]
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchRequest<'a> {
  pub items: Vec<BatchItem<'a>>,
  #[serde(rename = "deviceId")]
  pub device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(default)]
  pub errors: Vec<ItemFailure>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRequest<'a> {
  #[serde(rename = "deviceId")]
  pub device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
  pub error: String,
}

// ============================================================================
// PostgREST rows
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct DataRow<'a> {
  pub key: &'a str,
  pub value: String,
  pub updated_at: DateTime<Utc>,
  pub updated_by: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StoredRow {
  pub key: String,
  pub value: Value,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LogRow<'a> {
  pub action: SyncAction,
  pub key: &'a str,
  pub device_id: &'a str,
}

/// Accept RFC 3339 as well as SQLite's `YYYY-MM-DD HH:MM:SS`.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
  D: Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  parse_timestamp(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s)))
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
    .map(|dt| dt.and_utc())
    .ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn log_entries_accept_both_timestamp_styles() {
    let rows = json!([
      {"id": 1, "action": "save", "key": "theme", "timestamp": "2024-05-01 10:00:00", "device_id": "d1"},
      {"action": "batch_save", "key": "x", "timestamp": "2024-05-01T10:00:00.123+00:00", "device_id": "d2"},
    ]);
    let entries: Vec<SyncLogEntry> = serde_json::from_value(rows).unwrap();
    assert_eq!(entries[0].action, SyncAction::Save);
    assert_eq!(entries[1].action, SyncAction::BatchSave);
    assert!(entries[0].timestamp < entries[1].timestamp);
  }

  #[test]
  fn save_request_uses_api_field_names() {
    let value = json!({"mode": "dark"});
    let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
    let body = serde_json::to_value(SaveRequest {
      key: "theme",
      value: &value,
      device_id: "device_1_x",
      updated_at: at,
    })
    .unwrap();
    assert_eq!(body["deviceId"], "device_1_x");
    assert_eq!(body["value"], value);
    assert!(body.get("updatedAt").is_some());
  }
}
