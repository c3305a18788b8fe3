//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use release_tracker::digest::DigestResolver;
use release_tracker::format::SlackMessage;
use release_tracker::notify::Notifier;
use release_tracker::types::NotificationRef;
use release_tracker::{Config, Engine, EngineError};

/// Records posts and updates in completion order; can be told to fail, or to
/// stall a number of posts or updates.
#[derive(Default)]
pub struct RecordingNotifier {
  pub posts: Mutex<Vec<SlackMessage>>,
  pub updates: Mutex<Vec<(NotificationRef, SlackMessage)>>,
  pub fail: bool,
  pub stall: Duration,
  stalled_posts: AtomicUsize,
  stalled_updates: AtomicUsize,
}

impl RecordingNotifier {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  /// Every post sleeps `by`.
  pub fn stalling(by: Duration) -> Self {
    Self {
      stall: by,
      stalled_posts: AtomicUsize::new(usize::MAX),
      ..Self::default()
    }
  }

  /// Only the first post sleeps `by`.
  pub fn stalling_first_post(by: Duration) -> Self {
    Self {
      stall: by,
      stalled_posts: AtomicUsize::new(1),
      ..Self::default()
    }
  }

  /// Only the first update sleeps `by`.
  pub fn stalling_first_update(by: Duration) -> Self {
    Self {
      stall: by,
      stalled_updates: AtomicUsize::new(1),
      ..Self::default()
    }
  }

  async fn maybe_stall(&self, budget: &AtomicUsize) {
    let take = budget
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if take {
      tokio::time::sleep(self.stall).await;
    }
  }

  pub fn post_count(&self) -> usize {
    self.posts.lock().unwrap().len()
  }

  pub fn update_count(&self) -> usize {
    self.updates.lock().unwrap().len()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn post(&self, message: &SlackMessage) -> Result<NotificationRef, EngineError> {
    self.maybe_stall(&self.stalled_posts).await;
    if self.fail {
      return Err(EngineError::notify("channel_not_found"));
    }
    let mut posts = self.posts.lock().unwrap();
    posts.push(message.clone());
    Ok(NotificationRef {
      channel: message.channel.clone(),
      ts: format!("1700000000.{:06}", posts.len()),
    })
  }

  async fn update(&self, reference: &NotificationRef, message: &SlackMessage) -> Result<(), EngineError> {
    self.maybe_stall(&self.stalled_updates).await;
    self
      .updates
      .lock()
      .unwrap()
      .push((reference.clone(), message.clone()));
    Ok(())
  }
}

/// Answers every lookup with the same digest and remembers the URLs asked for.
#[derive(Default)]
pub struct StaticResolver {
  pub digest: Option<String>,
  pub requested: Mutex<Vec<String>>,
}

impl StaticResolver {
  pub fn with_digest(digest: &str) -> Self {
    Self {
      digest: Some(digest.to_string()),
      requested: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl DigestResolver for StaticResolver {
  async fn resolve(&self, output_url: &str) -> Result<Option<String>, EngineError> {
    self.requested.lock().unwrap().push(output_url.to_string());
    Ok(self.digest.clone())
  }
}

pub fn engine_with(
  config: Config,
  notifier: Arc<RecordingNotifier>,
  resolver: Arc<StaticResolver>,
) -> Engine {
  Engine::new(config, notifier, resolver)
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
  for _ in 0..100 {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  check()
}
