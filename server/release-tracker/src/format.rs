//! Slack message rendering for a release record.
//!
//! Pure function of the record: rendering the same state twice yields the same
//! message, so it is safe to re-render and edit the posted message as the
//! release moves through its stages.

use serde::Serialize;

use crate::types::{BuildStatus, ReleaseRecord};

const GOOD: &str = "good";
const WARNING: &str = "warning";
const DANGER: &str = "danger";
const NEUTRAL: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
  pub channel: String,
  pub text: String,
  pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
  pub color: &'static str,
  pub title: &'static str,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub title_link: String,
  pub text: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub fields: Vec<Field>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ts: Option<i64>,
  pub mrkdwn_in: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
  pub title: &'static str,
  pub value: String,
  pub short: bool,
}

/// Render the four-block release message (tag, build, image push, deploy).
pub fn render(record: &ReleaseRecord, channel: &str) -> SlackMessage {
  let commit_url = format!("{}/commit/{}", record.repo_url, record.commit_hash);
  SlackMessage {
    channel: channel.to_string(),
    text: format!(
      "{} <{}|{}> in {}/{}",
      record.tag,
      commit_url,
      record.short_commit(),
      record.repo_owner,
      record.repo_name
    ),
    attachments: vec![
      tag_block(record, &commit_url),
      build_block(record),
      image_block(record),
      deploy_block(record),
    ],
  }
}

fn tag_block(record: &ReleaseRecord, commit_url: &str) -> Attachment {
  let tree_url = format!("{}/tree/{}", record.repo_url, record.tag);
  Attachment {
    color: GOOD,
    title: "GitHub tag",
    title_link: tree_url.clone(),
    text: format!(
      "Commit <{}|{}> in <{}|{}> was tagged <{}|{}> by {}",
      commit_url,
      record.short_commit(),
      record.repo_url,
      record.repo_name,
      tree_url,
      record.tag,
      record.sender
    ),
    fields: Vec::new(),
    ts: Some(record.tagged_at.timestamp()),
    mrkdwn_in: vec!["text"],
  }
}

fn build_block(record: &ReleaseRecord) -> Attachment {
  let link = record.build_url.clone().unwrap_or_default();
  let build = match (record.build_number, &record.build_url) {
    (Some(n), Some(url)) => format!("<{}|{}>", url, n),
    (Some(n), None) => n.to_string(),
    (None, _) => String::new(),
  };

  let (color, text) = match (record.build_status, record.build_number) {
    (Some(BuildStatus::Succeeded), _) => (GOOD, format!("Build number {} has completed", build)),
    (Some(BuildStatus::Failed), _) => (DANGER, format!("Build number {} has failed", build)),
    (Some(BuildStatus::Pending), _) | (None, Some(_)) => {
      (WARNING, format!("Build number {} is running", build))
    }
    (None, None) => (NEUTRAL, format!("Waiting for a build of {}", record.tag)),
  };

  let fields = match record.build_time_millis {
    Some(ms) => vec![Field {
      title: "Duration",
      value: format_duration(ms),
      short: true,
    }],
    None => Vec::new(),
  };

  Attachment {
    color,
    title: "CircleCI build",
    title_link: link,
    text,
    fields,
    ts: None,
    mrkdwn_in: vec!["text"],
  }
}

fn image_block(record: &ReleaseRecord) -> Attachment {
  let mut fields = Vec::new();
  if let Some(digest) = &record.image_digest {
    fields.push(Field {
      title: "Checksum",
      value: digest.chars().take(12).collect(),
      short: false,
    });
  }

  let (color, title_link, text) = match (&record.image_url, record.image_pushed_at) {
    (Some(url), _) => {
      let image = match &record.image_tag {
        Some(tag) => format!("{}:{}", record.repo_name, tag),
        None => record.repo_name.clone(),
      };
      let status = record
        .image_status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| format!(" ({})", s))
        .unwrap_or_default();
      (
        GOOD,
        url.clone(),
        format!("Image {} was pushed to <{}|{}>{}", image, url, url, status),
      )
    }
    (None, Some(at)) => (
      WARNING,
      String::new(),
      format!(
        "Push step finished at {} UTC, waiting for the registry",
        at.format("%H:%M")
      ),
    ),
    (None, None) => (NEUTRAL, String::new(), "Waiting for an image push".to_string()),
  };

  Attachment {
    color,
    title: "Docker Hub image",
    title_link,
    text,
    fields,
    ts: record.image_pushed_at.map(|t| t.timestamp()),
    mrkdwn_in: vec!["text"],
  }
}

fn deploy_block(record: &ReleaseRecord) -> Attachment {
  let text = match &record.image_url {
    Some(_) => format!("{} is ready to deploy", record.tag),
    None => "Waiting for an image to deploy".to_string(),
  };
  Attachment {
    color: NEUTRAL,
    title: "Deploy",
    title_link: String::new(),
    text,
    fields: Vec::new(),
    ts: None,
    mrkdwn_in: vec!["text"],
  }
}

fn format_duration(ms: u64) -> String {
  let secs = ms / 1000;
  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else {
    format!("{}s", secs)
  }
}
