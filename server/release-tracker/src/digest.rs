//! Image digest lookup from a CircleCI step's output.
//!
//! The push step's first action exposes an `output_url` that returns a JSON
//! array of output chunks; the first chunk's `message` holds the registry's
//! `digest: sha256:<hex>` line.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::error::EngineError;

static DIGEST_REGEX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"digest:\s+sha256:(\w+)").unwrap());

#[async_trait]
pub trait DigestResolver: Send + Sync {
  /// `Ok(None)` when the output holds no digest line.
  async fn resolve(&self, output_url: &str) -> Result<Option<String>, EngineError>;
}

pub struct HttpDigestResolver {
  client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OutputChunk {
  #[serde(default)]
  message: Option<String>,
}

impl HttpDigestResolver {
  pub fn new(client: reqwest::Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl DigestResolver for HttpDigestResolver {
  async fn resolve(&self, output_url: &str) -> Result<Option<String>, EngineError> {
    let chunks: Vec<OutputChunk> = self
      .client
      .get(output_url)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    let message = chunks
      .into_iter()
      .next()
      .and_then(|c| c.message)
      .ok_or_else(|| EngineError::digest("step output has no message"))?;
    Ok(extract_digest(&message))
  }
}

/// Hex part of the first `digest: sha256:<hex>` in `message`.
pub fn extract_digest(message: &str) -> Option<String> {
  DIGEST_REGEX
    .captures(message)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_string())
}
