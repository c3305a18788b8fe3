//! Outbound Slack delivery.
//!
//! [`SlackNotifier`] talks to the Slack Web API; [`LogNotifier`] stands in when
//! no token is configured so releases are still tracked.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EngineError;
use crate::format::SlackMessage;
use crate::types::NotificationRef;

#[async_trait]
pub trait Notifier: Send + Sync {
  /// Post a new message and return a handle for later edits.
  async fn post(&self, message: &SlackMessage) -> Result<NotificationRef, EngineError>;

  /// Replace a previously posted message.
  async fn update(&self, reference: &NotificationRef, message: &SlackMessage) -> Result<(), EngineError>;
}

pub struct SlackNotifier {
  client: reqwest::Client,
  api_url: String,
  token: String,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
  ok: bool,
  #[serde(default)]
  ts: Option<String>,
  #[serde(default)]
  channel: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

impl SlackNotifier {
  pub fn new(client: reqwest::Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      client,
      api_url: api_url.into().trim_end_matches('/').to_string(),
      token: token.into(),
    }
  }

  async fn call(&self, method: &str, body: &serde_json::Value) -> Result<SlackResponse, EngineError> {
    let resp: SlackResponse = self
      .client
      .post(format!("{}/{}", self.api_url, method))
      .bearer_auth(&self.token)
      .json(body)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    // Slack answers 200 with ok=false for API-level errors.
    if !resp.ok {
      let reason = resp.error.unwrap_or_else(|| "unknown error".into());
      return Err(EngineError::notify(format!("{}: {}", method, reason)));
    }
    Ok(resp)
  }
}

#[async_trait]
impl Notifier for SlackNotifier {
  async fn post(&self, message: &SlackMessage) -> Result<NotificationRef, EngineError> {
    let body = serde_json::to_value(message)?;
    let resp = self.call("chat.postMessage", &body).await?;
    let ts = resp
      .ts
      .ok_or_else(|| EngineError::notify("chat.postMessage: response without ts"))?;
    Ok(NotificationRef {
      channel: resp.channel.unwrap_or_else(|| message.channel.clone()),
      ts,
    })
  }

  async fn update(&self, reference: &NotificationRef, message: &SlackMessage) -> Result<(), EngineError> {
    let body = serde_json::json!({
      "channel": reference.channel,
      "ts": reference.ts,
      "text": message.text,
      "attachments": message.attachments,
    });
    self.call("chat.update", &body).await?;
    Ok(())
  }
}

/// Logs messages instead of sending them. References are `local.<n>`.
#[derive(Debug, Default)]
pub struct LogNotifier {
  sent: AtomicU64,
}

impl LogNotifier {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Notifier for LogNotifier {
  async fn post(&self, message: &SlackMessage) -> Result<NotificationRef, EngineError> {
    let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(channel = %message.channel, text = %message.text, "slack disabled, not posting");
    Ok(NotificationRef {
      channel: message.channel.clone(),
      ts: format!("local.{}", n),
    })
  }

  async fn update(&self, reference: &NotificationRef, message: &SlackMessage) -> Result<(), EngineError> {
    tracing::info!(ts = %reference.ts, text = %message.text, "slack disabled, not updating");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::format::render;
  use crate::types::{ReleaseRecord, TagEvent};
  use chrono::Utc;

  #[tokio::test]
  async fn log_notifier_hands_out_distinct_refs() {
    let record = ReleaseRecord::new(
      TagEvent {
        tag: "v1.2.0".into(),
        commit_hash: "abc123".into(),
        sender: "alice".into(),
        repo_owner: "org".into(),
        repo_name: "ui".into(),
        repo_url: "https://github.com/org/ui".into(),
      },
      Utc::now(),
    );
    let message = render(&record, "releases");
    let notifier = LogNotifier::new();
    let a = notifier.post(&message).await.unwrap();
    let b = notifier.post(&message).await.unwrap();
    assert_ne!(a.ts, b.ts);
    assert_eq!(a.channel, "releases");
    notifier.update(&a, &message).await.unwrap();
  }

  #[test]
  fn slack_error_response_parses() {
    let resp: SlackResponse =
      serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
    assert!(!resp.ok);
    assert_eq!(resp.error.as_deref(), Some("channel_not_found"));
    assert!(resp.ts.is_none());
  }
}
