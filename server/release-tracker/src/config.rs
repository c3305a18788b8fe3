//! Tracker configuration with sane defaults, plus the CLI/env surface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

/// Tunables for correlation and the two outbound calls.
#[derive(Debug, Clone)]
pub struct Config {
  /// CircleCI step whose completion marks the registry push.
  pub push_step_name: String,
  /// Slack bot token. Without one, messages are only logged.
  pub slack_token: Option<String>,
  /// Channel the release messages go to.
  pub slack_channel: String,
  /// Slack Web API base URL.
  pub slack_api_url: String,
  /// Upper bound on one Slack call.
  pub notify_timeout: Duration,
  /// Upper bound on one CircleCI step-output fetch.
  pub digest_timeout: Duration,
  /// Re-render and edit the Slack message on every stage transition.
  pub update_notifications: bool,
  /// Write a resolved image digest back onto its record.
  pub attach_image_digest: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      push_step_name: "docker push".into(),
      slack_token: None,
      slack_channel: "releases".into(),
      slack_api_url: "https://slack.com/api".into(),
      notify_timeout: Duration::from_secs(10),
      digest_timeout: Duration::from_secs(10),
      update_notifications: false,
      attach_image_digest: false,
    }
  }
}

#[derive(Debug, Parser)]
#[command(name = "release-tracker", about = "Correlates tag, build and image-push webhooks into release records")]
pub struct Cli {
  /// Listen port
  #[arg(short, long, env = "PORT", default_value_t = 3000)]
  pub port: u16,

  /// Listen address
  #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
  pub bind: IpAddr,

  /// Slack bot token
  #[arg(long, env = "SLACK_TOKEN")]
  pub token: Option<String>,

  /// Slack channel for release messages
  #[arg(long, env = "SLACK_CHANNEL", default_value = "releases")]
  pub channel: String,

  /// CircleCI step name that pushes the image
  #[arg(long, env = "PUSH_STEP_NAME", default_value = "docker push")]
  pub push_step: String,

  /// Slack call timeout (seconds)
  #[arg(long, env = "NOTIFY_TIMEOUT_SECS", default_value_t = 10)]
  pub notify_timeout_secs: u64,

  /// Step-output fetch timeout (seconds)
  #[arg(long, env = "DIGEST_TIMEOUT_SECS", default_value_t = 10)]
  pub digest_timeout_secs: u64,

  /// Edit the Slack message as the release progresses
  #[arg(long, env = "UPDATE_NOTIFICATIONS")]
  pub update_notifications: bool,

  /// Store resolved image digests on their records
  #[arg(long, env = "ATTACH_IMAGE_DIGEST")]
  pub attach_image_digest: bool,
}

impl Cli {
  pub fn addr(&self) -> SocketAddr {
    SocketAddr::new(self.bind, self.port)
  }

  pub fn into_config(self) -> Config {
    let slack_token = self.token.filter(|t| !t.is_empty());
    if slack_token.is_none() {
      tracing::warn!("SLACK_TOKEN not set -- release messages will only be logged");
    }

    Config {
      push_step_name: self.push_step,
      slack_token,
      slack_channel: self.channel,
      notify_timeout: Duration::from_secs(self.notify_timeout_secs),
      digest_timeout: Duration::from_secs(self.digest_timeout_secs),
      update_notifications: self.update_notifications,
      attach_image_digest: self.attach_image_digest,
      ..Config::default()
    }
  }
}
