//! Core types for the release tracker (webhook JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inbound types (JSON contracts: what GitHub, CircleCI and Docker Hub send)
// ---------------------------------------------------------------------------

/// GitHub push webhook body. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubPayload {
  #[serde(rename = "ref", default)]
  pub git_ref: Option<String>,
  #[serde(default)]
  pub after: Option<String>,
  #[serde(default)]
  pub deleted: bool,
  #[serde(default)]
  pub head_commit: Option<GithubCommit>,
  pub sender: GithubSender,
  pub repository: GithubRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubCommit {
  #[serde(default)]
  pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubSender {
  pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRepository {
  pub owner: GithubOwner,
  pub name: String,
  pub url: String,
}

/// Owner as sent on a push; `name` is preferred, `login` is the fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubOwner {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub login: Option<String>,
}

/// CircleCI notify-hook body: everything of interest sits under `payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct CircleCiEnvelope {
  pub payload: CircleCiBuild,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircleCiBuild {
  #[serde(default)]
  pub vcs_tag: Option<String>,
  #[serde(default)]
  pub vcs_revision: Option<String>,
  #[serde(default, alias = "buildNum")]
  pub build_num: Option<u64>,
  #[serde(default)]
  pub outcome: Option<String>,
  #[serde(default)]
  pub build_time_millis: Option<u64>,
  #[serde(default)]
  pub build_url: Option<String>,
  #[serde(default)]
  pub steps: Vec<CircleCiStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircleCiStep {
  pub name: String,
  #[serde(default)]
  pub end_time: Option<String>,
  #[serde(default)]
  pub actions: Vec<CircleCiAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircleCiAction {
  #[serde(default)]
  pub end_time: Option<String>,
  #[serde(default)]
  pub output_url: Option<String>,
}

/// Query string of the in-progress `GET /circleci` touch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CircleCiQuery {
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(default)]
  pub sha1: Option<String>,
  #[serde(default, rename = "buildNum")]
  pub build_num: Option<String>,
  #[serde(default, rename = "buildUrl")]
  pub build_url: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}

/// Docker Hub repository webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct DockerHubPayload {
  pub push_data: DockerPushData,
  pub repository: DockerRepository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerPushData {
  /// Epoch seconds.
  #[serde(default)]
  pub pushed_at: Option<i64>,
  #[serde(default)]
  pub tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerRepository {
  #[serde(default)]
  pub repo_url: Option<String>,
  #[serde(default)]
  pub repo_name: Option<String>,
  #[serde(default)]
  pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Internal normalized events
// ---------------------------------------------------------------------------

/// A tag was pushed. The only event that creates records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEvent {
  pub tag: String,
  pub commit_hash: String,
  pub sender: String,
  pub repo_owner: String,
  pub repo_name: String,
  pub repo_url: String,
}

/// A CircleCI build finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
  pub tag: Option<String>,
  pub commit_hash: Option<String>,
  pub build_number: u64,
  pub status: BuildStatus,
  pub build_time_millis: Option<u64>,
  pub build_url: Option<String>,
  /// Completion of the push step, minute-truncated.
  pub image_pushed_at: Option<DateTime<Utc>>,
  /// Step output to scan for the pushed digest.
  pub digest_url: Option<String>,
}

/// A CircleCI build reported itself as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildProgress {
  pub tag: String,
  pub commit_hash: String,
  pub build_number: u64,
  pub build_url: Option<String>,
}

/// Docker Hub accepted an image. No tag or build identity is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
  /// Minute-truncated push time.
  pub pushed_at: DateTime<Utc>,
  pub repo_url: String,
  pub repo_name: Option<String>,
  pub status: String,
  pub image_tag: Option<String>,
}

// ---------------------------------------------------------------------------
// Release record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
  Pending,
  Succeeded,
  Failed,
}

impl BuildStatus {
  /// CircleCI outcomes: only `success` counts, the rest (failed, canceled,
  /// timedout, infrastructure_fail, ...) end the release.
  pub fn from_outcome(outcome: &str) -> Self {
    if outcome.eq_ignore_ascii_case("success") {
      Self::Succeeded
    } else {
      Self::Failed
    }
  }
}

/// Where a release is in the pipeline. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Tagged,
  Building,
  Built,
  Pushed,
  Failed,
}

impl Stage {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Pushed | Self::Failed)
  }
}

/// Handle on a Slack message, used to edit it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRef {
  pub channel: String,
  pub ts: String,
}

/// One pipeline run, from tag to pushed image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReleaseRecord {
  /// Stable hash of repo + tag + commit.
  pub release_id: String,
  pub tag: String,
  pub commit_hash: String,
  pub sender: String,
  pub repo_owner: String,
  pub repo_name: String,
  pub repo_url: String,
  pub tagged_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notification_ref: Option<NotificationRef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_number: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_status: Option<BuildStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub build_time_millis: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_pushed_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_status: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_tag: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_digest: Option<String>,
}

impl ReleaseRecord {
  pub fn new(event: TagEvent, tagged_at: DateTime<Utc>) -> Self {
    let release_id = {
      let mut hasher = blake3::Hasher::new();
      hasher.update(event.repo_url.as_bytes());
      hasher.update(b"|");
      hasher.update(event.tag.as_bytes());
      hasher.update(b"|");
      hasher.update(event.commit_hash.as_bytes());
      let hex = hasher.finalize().to_hex();
      format!("rel-{}", &hex[..16])
    };

    Self {
      release_id,
      tag: event.tag,
      commit_hash: event.commit_hash,
      sender: event.sender,
      repo_owner: event.repo_owner,
      repo_name: event.repo_name,
      repo_url: event.repo_url,
      tagged_at,
      notification_ref: None,
      build_number: None,
      build_url: None,
      build_status: None,
      build_time_millis: None,
      image_pushed_at: None,
      image_url: None,
      image_status: None,
      image_tag: None,
      image_digest: None,
    }
  }

  pub fn stage(&self) -> Stage {
    match self.build_status {
      Some(BuildStatus::Failed) => Stage::Failed,
      _ if self.image_url.is_some() => Stage::Pushed,
      Some(BuildStatus::Succeeded) => Stage::Built,
      Some(BuildStatus::Pending) => Stage::Building,
      None if self.build_number.is_some() => Stage::Building,
      None => Stage::Tagged,
    }
  }

  /// Seven-character commit abbreviation, as GitHub shows it.
  pub fn short_commit(&self) -> &str {
    let end = self
      .commit_hash
      .char_indices()
      .nth(7)
      .map_or(self.commit_hash.len(), |(i, _)| i);
    &self.commit_hash[..end]
  }
}

// ---------------------------------------------------------------------------
// Output types (JSON contract: what the webhook endpoints answer)
// ---------------------------------------------------------------------------

/// Why an event did not touch the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
  /// Parsed fine but not something we track (branch push, deleted tag).
  Irrelevant,
  /// Required field absent or unparseable.
  Malformed,
  /// A record for this tag + commit already exists or is being published.
  Duplicate,
  /// No record correlates with the event.
  NoMatch,
  /// The correlating tag is still waiting for its Slack message.
  Pending,
}

/// `{"status":"ok"}` / `{"status":"ignored","reason":...}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReply {
  pub status: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<IgnoreReason>,
}

impl StatusReply {
  pub fn ok() -> Self {
    Self {
      status: "ok",
      reason: None,
    }
  }

  pub fn ignored(reason: IgnoreReason) -> Self {
    Self {
      status: "ignored",
      reason: Some(reason),
    }
  }
}
