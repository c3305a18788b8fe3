//! Normalize webhook bodies into internal events.
//!
//! `Ok(None)` means the payload is well formed but not something we track;
//! `Err` means a required field is missing or unparseable. The HTTP layer
//! answers "ignored" for both.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::matcher::truncate_to_minute;
use crate::types::*;

/// GitHub tag push -> [`TagEvent`]. Branch pushes, tag deletions and `create`
/// hooks (bare `ref`, no commit) yield `None`.
pub fn tag_event(raw: &GithubPayload) -> Result<Option<TagEvent>, EngineError> {
  let tag = match raw
    .git_ref
    .as_deref()
    .and_then(|r| r.strip_prefix("refs/tags/"))
  {
    Some(t) if !t.is_empty() => t,
    _ => return Ok(None),
  };

  let after = raw.after.as_deref().filter(|a| !a.is_empty());
  if raw.deleted || after.is_some_and(is_null_sha) {
    return Ok(None);
  }

  let commit_hash = after
    .or_else(|| {
      raw
        .head_commit
        .as_ref()
        .and_then(|c| c.id.as_deref())
        .filter(|id| !id.is_empty())
    })
    .ok_or_else(|| EngineError::validation("after", "no commit in after or head_commit.id"))?;

  let repo_owner = raw
    .repository
    .owner
    .name
    .as_deref()
    .or(raw.repository.owner.login.as_deref())
    .filter(|o| !o.is_empty())
    .ok_or_else(|| EngineError::validation("repository.owner", "expected name or login"))?;

  if raw.sender.login.is_empty() {
    return Err(EngineError::validation("sender.login", "must not be empty"));
  }
  if raw.repository.name.is_empty() {
    return Err(EngineError::validation("repository.name", "must not be empty"));
  }

  Ok(Some(TagEvent {
    tag: tag.to_string(),
    commit_hash: commit_hash.to_string(),
    sender: raw.sender.login.clone(),
    repo_owner: repo_owner.to_string(),
    repo_name: raw.repository.name.clone(),
    repo_url: raw.repository.url.trim_end_matches('/').to_string(),
  }))
}

/// CircleCI build completion -> [`BuildEvent`].
///
/// The step named `push_step_name` supplies the image push time and the
/// output URL for digest lookup; without it both stay `None` and correlation
/// proceeds on build identity alone.
pub fn build_event(raw: &CircleCiEnvelope, push_step_name: &str) -> Result<BuildEvent, EngineError> {
  let build = &raw.payload;
  let build_number = build
    .build_num
    .ok_or_else(|| EngineError::validation("payload.build_num", "missing"))?;
  let outcome = build
    .outcome
    .as_deref()
    .filter(|o| !o.is_empty())
    .ok_or_else(|| EngineError::validation("payload.outcome", "missing"))?;

  let push_step = build.steps.iter().find(|s| s.name == push_step_name);
  if push_step.is_none() {
    tracing::debug!(build_num = build_number, step = push_step_name, "no push step in build");
  }

  let image_pushed_at = push_step.and_then(|step| {
    let end_time = step
      .end_time
      .as_deref()
      .or_else(|| step.actions.first().and_then(|a| a.end_time.as_deref()))?;
    match parse_time(end_time) {
      Some(ts) => Some(truncate_to_minute(ts)),
      None => {
        tracing::warn!(build_num = build_number, end_time, "unparseable push step end_time");
        None
      }
    }
  });

  let digest_url = push_step
    .and_then(|step| step.actions.first())
    .and_then(|a| a.output_url.clone())
    .filter(|u| !u.is_empty());

  Ok(BuildEvent {
    tag: non_empty(build.vcs_tag.as_deref()),
    commit_hash: non_empty(build.vcs_revision.as_deref()),
    build_number,
    status: BuildStatus::from_outcome(outcome),
    build_time_millis: build.build_time_millis,
    build_url: non_empty(build.build_url.as_deref()),
    image_pushed_at,
    digest_url,
  })
}

/// `GET /circleci` query -> [`BuildProgress`].
pub fn build_progress(query: &CircleCiQuery) -> Result<BuildProgress, EngineError> {
  let tag = non_empty(query.tag.as_deref())
    .ok_or_else(|| EngineError::validation("tag", "missing"))?;
  let commit_hash = non_empty(query.sha1.as_deref())
    .ok_or_else(|| EngineError::validation("sha1", "missing"))?;
  let build_number = query
    .build_num
    .as_deref()
    .ok_or_else(|| EngineError::validation("buildNum", "missing"))?
    .trim()
    .parse::<u64>()
    .map_err(|e| EngineError::validation("buildNum", &format!("not a build number: {}", e)))?;

  Ok(BuildProgress {
    tag,
    commit_hash,
    build_number,
    build_url: non_empty(query.build_url.as_deref()),
  })
}

/// Docker Hub push -> [`RegistryEvent`] with a minute-truncated push time.
pub fn registry_event(raw: &DockerHubPayload) -> Result<RegistryEvent, EngineError> {
  let pushed_at = raw
    .push_data
    .pushed_at
    .ok_or_else(|| EngineError::validation("push_data.pushed_at", "missing"))?;
  let pushed_at = DateTime::from_timestamp(pushed_at, 0)
    .ok_or_else(|| EngineError::validation("push_data.pushed_at", "out of range"))?;
  let repo_url = non_empty(raw.repository.repo_url.as_deref())
    .ok_or_else(|| EngineError::validation("repository.repo_url", "missing"))?;

  Ok(RegistryEvent {
    pushed_at: truncate_to_minute(pushed_at),
    repo_url,
    repo_name: non_empty(raw.repository.repo_name.as_deref()),
    status: raw.repository.status.clone().unwrap_or_default(),
    image_tag: non_empty(raw.push_data.tag.as_deref()),
  })
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .ok()
    .map(|t| t.with_timezone(&Utc))
}

fn non_empty(s: Option<&str>) -> Option<String> {
  s.filter(|v| !v.is_empty()).map(str::to_string)
}

/// GitHub reports a deleted ref with an all-zero `after`.
fn is_null_sha(sha: &str) -> bool {
  sha.bytes().all(|b| b == b'0')
}
