//! Structured error types for the release tracker.
//!
//! None of these ever reach a webhook sender as a server error: the HTTP
//! layer logs them and answers `{"status":"ignored"}`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("notify: {0}")]
  Notify(String),

  #[error("digest: {0}")]
  Digest(String),

  #[error("{operation} timed out after {after:?}")]
  Timeout {
    operation: &'static str,
    after: Duration,
  },

  #[error("http: {0}")]
  Http(#[from] reqwest::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn notify(msg: impl Into<String>) -> Self {
    Self::Notify(msg.into())
  }

  pub fn digest(msg: impl Into<String>) -> Self {
    Self::Digest(msg.into())
  }
}
