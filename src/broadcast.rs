//! Cross-tab change notifications.
//!
//! A [`ChannelHub`] stands for everything sharing one origin: every service
//! instance built on the same hub sees the others' messages. Publishing
//! opens a sender handle for the named channel, sends once and drops it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::cache::Stamp;
use crate::identity::{DeviceId, TabId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Created,
  Updated,
  Deleted,
}

/// A locally applied change, as seen by other tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
  #[serde(rename = "type")]
  pub kind: ChangeKind,
  pub key: String,
  /// New value; None for deletes
  pub data: Option<Value>,
  pub updated_at: DateTime<Utc>,
  pub updated_by: DeviceId,
  /// Tab that made the change
  pub origin: TabId,
}

impl ChangeMessage {
  pub fn stamp(&self) -> Stamp {
    Stamp::new(self.updated_at, self.updated_by.clone())
  }
}

/// Registry of named channels shared by every tab of one origin.
#[derive(Clone, Default)]
pub struct ChannelHub {
  channels: Arc<Mutex<HashMap<String, broadcast::Sender<ChangeMessage>>>>,
}

impl ChannelHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start listening on `channel`. Only messages sent after this call are seen.
  pub fn subscribe(&self, channel: &str) -> ChangeFeed {
    ChangeFeed {
      rx: self.open(channel).subscribe(),
    }
  }

  /// Short-lived handle to `channel`, created on first use.
  fn open(&self, channel: &str) -> broadcast::Sender<ChangeMessage> {
    self
      .channels
      .lock()
      .entry(channel.to_string())
      .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
      .clone()
  }
}

/// Publishes one tab's changes on a named channel.
#[derive(Clone)]
pub struct Broadcaster {
  hub: ChannelHub,
  channel: String,
  origin: TabId,
}

impl Broadcaster {
  pub fn new(hub: ChannelHub, channel: impl Into<String>, origin: TabId) -> Self {
    Self {
      hub,
      channel: channel.into(),
      origin,
    }
  }

  pub fn origin(&self) -> &TabId {
    &self.origin
  }

  /// Fire-and-forget. Returns how many listeners received the message.
  pub fn publish(&self, kind: ChangeKind, key: &str, data: Option<Value>, stamp: &Stamp) -> usize {
    let message = ChangeMessage {
      kind,
      key: key.to_string(),
      data,
      updated_at: stamp.updated_at,
      updated_by: stamp.updated_by.clone(),
      origin: self.origin.clone(),
    };

    let handle = self.hub.open(&self.channel);
    let delivered = handle.send(message).unwrap_or(0);
    drop(handle);

    trace!(key, ?kind, delivered, "published change");
    delivered
  }
}

/// Receiving end of a channel.
pub struct ChangeFeed {
  rx: broadcast::Receiver<ChangeMessage>,
}

impl ChangeFeed {
  /// Receive the next message. A slow listener skips what it missed.
  pub async fn next(&mut self) -> Option<ChangeMessage> {
    loop {
      match self.rx.recv().await {
        Ok(message) => return Some(message),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "change feed lagged, some notifications were dropped");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Next message if one is already waiting.
  pub fn try_next(&mut self) -> Option<ChangeMessage> {
    loop {
      match self.rx.try_recv() {
        Ok(message) => return Some(message),
        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        Err(_) => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn stamp() -> Stamp {
    Stamp::new(Utc::now(), DeviceId::from("device_a"))
  }

  #[tokio::test]
  async fn subscribers_on_the_same_channel_receive_messages() {
    let hub = ChannelHub::new();
    let mut feed = hub.subscribe("dashboard-sync");
    let mut other = hub.subscribe("elsewhere");
    let tab = TabId::generate();
    let broadcaster = Broadcaster::new(hub, "dashboard-sync", tab.clone());

    let delivered = broadcaster.publish(ChangeKind::Created, "theme", Some(json!(1)), &stamp());
    assert_eq!(delivered, 1);

    let message = feed.next().await.unwrap();
    assert_eq!(message.kind, ChangeKind::Created);
    assert_eq!(message.key, "theme");
    assert_eq!(message.data, Some(json!(1)));
    assert_eq!(message.origin, tab);
    assert!(other.try_next().is_none());
  }

  #[test]
  fn publishing_without_listeners_is_harmless() {
    let broadcaster = Broadcaster::new(ChannelHub::new(), "dashboard-sync", TabId::generate());
    assert_eq!(broadcaster.publish(ChangeKind::Deleted, "k", None, &stamp()), 0);
  }

  #[test]
  fn message_serializes_with_type_field() {
    let message = ChangeMessage {
      kind: ChangeKind::Updated,
      key: "k".into(),
      data: Some(json!({"a": 1})),
      updated_at: Utc::now(),
      updated_by: DeviceId::from("device_a"),
      origin: TabId::generate(),
    };
    let v = serde_json::to_value(&message).unwrap();
    assert_eq!(v["type"], "updated");
    assert_eq!(v["key"], "k");
  }
}
