//! Core engine: owns the release store and correlates events into records.
//!
//! Every lookup-then-mutate runs under one `std::sync::Mutex`; the guard is
//! never held across an `.await`. The two slow calls (Slack post, digest
//! fetch) run outside the lock and re-enter it only to write their result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::digest::DigestResolver;
use crate::error::EngineError;
use crate::format;
use crate::identity::LookupPlan;
use crate::matcher::{MinuteMatcher, PushTimeMatcher};
use crate::notify::Notifier;
use crate::store::{RecordId, ReleaseStore, ReleaseView};
use crate::types::*;

/// Result of a correlating event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  Ignored(IgnoreReason),
  Updated(ReleaseView),
}

/// Result of phase one of tag handling.
#[derive(Debug)]
pub enum Admission {
  /// Reserved; hand to [`Engine::publish`] to make it visible.
  Pending(PendingRelease),
  Ignored(IgnoreReason),
}

/// A record whose (tag, commit) is reserved but whose Slack message has not
/// been sent yet. Invisible to correlation until published.
#[derive(Debug)]
pub struct PendingRelease {
  record: ReleaseRecord,
}

impl PendingRelease {
  pub fn record(&self) -> &ReleaseRecord {
    &self.record
  }
}

/// The release correlation engine. Cheap to share behind an `Arc`.
pub struct Engine {
  config: Config,
  store: Arc<Mutex<ReleaseStore>>,
  notifier: Arc<dyn Notifier>,
  resolver: Arc<dyn DigestResolver>,
  matcher: Box<dyn PushTimeMatcher>,
  editor: MessageEditor,
}

impl Engine {
  pub fn new(config: Config, notifier: Arc<dyn Notifier>, resolver: Arc<dyn DigestResolver>) -> Self {
    let store = Arc::new(Mutex::new(ReleaseStore::new()));
    let editor = MessageEditor {
      store: Arc::clone(&store),
      notifier: Arc::clone(&notifier),
      channel: config.slack_channel.clone(),
      timeout: config.notify_timeout,
      slots: Arc::new(Mutex::new(HashMap::new())),
    };
    Self {
      config,
      store,
      notifier,
      resolver,
      matcher: Box::new(MinuteMatcher),
      editor,
    }
  }

  /// Replace the push-time matcher (default: same minute).
  pub fn with_matcher(mut self, matcher: impl PushTimeMatcher + 'static) -> Self {
    self.matcher = Box::new(matcher);
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  fn lock(&self) -> MutexGuard<'_, ReleaseStore> {
    lock_store(&self.store)
  }

  // -------------------------------------------------------------------------
  // Tag events (two-phase)
  // -------------------------------------------------------------------------

  /// Phase one: reject duplicates and reserve the (tag, commit) pair.
  pub fn admit_tag(&self, event: TagEvent) -> Admission {
    let mut store = self.lock();
    let plan = LookupPlan::for_tag(&event.tag, &event.commit_hash);
    if store.find_plan(&plan, self.matcher.as_ref()).is_some()
      || !store.reserve(&event.tag, &event.commit_hash)
    {
      tracing::info!(tag = %event.tag, commit = %event.commit_hash, "duplicate tag event");
      return Admission::Ignored(IgnoreReason::Duplicate);
    }

    tracing::info!(tag = %event.tag, commit = %event.commit_hash, "tag admitted");
    Admission::Pending(PendingRelease {
      record: ReleaseRecord::new(event, Utc::now()),
    })
  }

  /// Phase two: post the Slack message, then insert the record with its
  /// message handle. On failure or timeout the reservation is dropped and the
  /// release is not tracked.
  pub async fn publish(&self, pending: PendingRelease) -> Option<RecordId> {
    let mut record = pending.record;
    let message = format::render(&record, &self.config.slack_channel);
    let sent = bounded(
      "slack post",
      self.config.notify_timeout,
      self.notifier.post(&message),
    )
    .await;

    let mut store = self.lock();
    match sent {
      Ok(reference) => {
        record.notification_ref = Some(reference);
        let tag = record.tag.clone();
        let id = store.commit_pending(record);
        tracing::info!(record_id = %id, tag = %tag, "release published");
        Some(id)
      }
      Err(e) => {
        store.abandon_pending(&record.tag, &record.commit_hash);
        tracing::warn!(tag = %record.tag, commit = %record.commit_hash, error = %e, "release dropped: notification failed");
        None
      }
    }
  }

  // -------------------------------------------------------------------------
  // Build events
  // -------------------------------------------------------------------------

  /// `GET /circleci`: a build for (tag, commit) is running.
  pub fn on_build_progress(&self, progress: BuildProgress) -> Outcome {
    let view = {
      let mut store = self.lock();
      let plan = LookupPlan::for_build(
        progress.build_number,
        Some(&progress.tag),
        Some(&progress.commit_hash),
      );
      let Some(id) = store.find_plan(&plan, self.matcher.as_ref()) else {
        return unmatched(&store, Some(&progress.tag), Some(&progress.commit_hash), "build progress");
      };

      store.update(id, |r| {
        r.build_number = Some(progress.build_number);
        if progress.build_url.is_some() {
          r.build_url = progress.build_url.clone();
        }
        // A late progress touch must not downgrade a finished build.
        r.build_status.get_or_insert(BuildStatus::Pending);
      });
      store.view(id)
    };

    self.transitioned(view, "build progress")
  }

  /// `POST /circleci`: a build finished. A non-success outcome reports the
  /// final state once and removes the record.
  pub fn on_build(&self, event: BuildEvent) -> Outcome {
    let view = {
      let mut store = self.lock();
      let plan = LookupPlan::for_build(
        event.build_number,
        event.tag.as_deref(),
        event.commit_hash.as_deref(),
      );
      let Some(id) = store.find_plan(&plan, self.matcher.as_ref()) else {
        return unmatched(&store, event.tag.as_deref(), event.commit_hash.as_deref(), "build");
      };

      store.update(id, |r| {
        r.build_number = Some(event.build_number);
        r.build_status = Some(event.status);
        if event.build_time_millis.is_some() {
          r.build_time_millis = event.build_time_millis;
        }
        if event.build_url.is_some() {
          r.build_url = event.build_url.clone();
        }
        if event.image_pushed_at.is_some() {
          r.image_pushed_at = event.image_pushed_at;
        }
      });
      let view = store.view(id);
      if event.status == BuildStatus::Failed {
        store.delete(id);
        tracing::info!(record_id = %id, build_num = event.build_number, "build failed, release dropped");
      }
      view
    };

    if let Some(url) = event.digest_url {
      self.spawn_digest(event.build_number, url);
    }
    self.transitioned(view, "build")
  }

  // -------------------------------------------------------------------------
  // Registry events
  // -------------------------------------------------------------------------

  /// `POST /dockerhub`: first record whose push time matches wins.
  pub fn on_registry(&self, event: RegistryEvent) -> Outcome {
    let view = {
      let mut store = self.lock();
      let plan = LookupPlan::for_push(event.pushed_at);
      let Some(id) = store.find_plan(&plan, self.matcher.as_ref()) else {
        tracing::info!(pushed_at = %event.pushed_at, repo = %event.repo_url, "registry push: no match");
        return Outcome::Ignored(IgnoreReason::NoMatch);
      };

      store.update(id, |r| {
        r.image_url = Some(event.repo_url.clone());
        r.image_status = Some(event.status.clone());
        if event.image_tag.is_some() {
          r.image_tag = event.image_tag.clone();
        }
      });
      store.view(id)
    };

    self.transitioned(view, "registry push")
  }

  // -------------------------------------------------------------------------
  // Notifications
  // -------------------------------------------------------------------------

  /// Re-render a record and edit its Slack message in place. Waits behind any
  /// edit of the same message already in flight.
  pub async fn refresh_notification(&self, id: RecordId) -> Result<(), EngineError> {
    if self.lock().get(id).is_none() {
      return Err(EngineError::notify(format!("record {} not found", id)));
    }
    let revision = self.editor.next_revision(id);
    self.editor.send(id, revision, None).await.map(|_| ())
  }

  fn transitioned(&self, view: Option<ReleaseView>, source: &'static str) -> Outcome {
    let Some(view) = view else {
      return Outcome::Ignored(IgnoreReason::NoMatch);
    };
    tracing::info!(
      record_id = %view.id,
      tag = %view.record.tag,
      stage = ?view.stage,
      source,
      "release updated"
    );

    if self.config.update_notifications {
      // A failed record has already left the store; its final state is the view.
      self.editor.spawn(view.id, Some(view.record.clone()));
    }
    Outcome::Updated(view)
  }

  /// Fetch the pushed digest without blocking the response. Logged, and
  /// written back only when `attach_image_digest` is on.
  fn spawn_digest(&self, build_number: u64, url: String) {
    let resolver = Arc::clone(&self.resolver);
    let store = Arc::clone(&self.store);
    let after = self.config.digest_timeout;
    let attach = self.config.attach_image_digest;
    let editor = self.config.update_notifications.then(|| self.editor.clone());

    tokio::spawn(async move {
      match bounded("digest fetch", after, resolver.resolve(&url)).await {
        Ok(Some(digest)) => {
          tracing::info!(build_num = build_number, digest = %digest, "image digest resolved");
          if !attach {
            return;
          }
          let written = {
            let mut guard = lock_store(&store);
            let found = guard.find(|r| r.build_number == Some(build_number));
            if let Some(id) = found {
              guard.update(id, |r| r.image_digest = Some(digest));
            }
            found
          };
          match (written, editor) {
            (Some(id), Some(editor)) => editor.spawn(id, None),
            (Some(_), None) => {}
            (None, _) => tracing::debug!(build_num = build_number, "digest resolved after record left the store"),
          }
        }
        Ok(None) => tracing::debug!(build_num = build_number, "no digest in push step output"),
        Err(e) => tracing::warn!(build_num = build_number, url = %url, error = %e, "digest lookup failed"),
      }
    });
  }

  // -------------------------------------------------------------------------
  // Queries
  // -------------------------------------------------------------------------

  pub fn records(&self) -> Vec<ReleaseView> {
    self.lock().snapshot()
  }

  pub fn find_by_build(&self, build_number: u64) -> Option<ReleaseView> {
    let store = self.lock();
    let plan = LookupPlan::for_build(build_number, None, None);
    store
      .find_plan(&plan, self.matcher.as_ref())
      .and_then(|id| store.view(id))
  }

  pub fn find_by_tag(&self, tag: &str, commit_hash: &str) -> Option<ReleaseView> {
    let store = self.lock();
    let plan = LookupPlan::for_tag(tag, commit_hash);
    store
      .find_plan(&plan, self.matcher.as_ref())
      .and_then(|id| store.view(id))
  }
}

fn lock_store(store: &Mutex<ReleaseStore>) -> MutexGuard<'_, ReleaseStore> {
  // A panic mid-update leaves at worst one half-written record; keep serving.
  store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ignored outcome for an unmatched build-side event; distinguishes a tag
/// still waiting on its Slack message.
fn unmatched(store: &ReleaseStore, tag: Option<&str>, commit_hash: Option<&str>, source: &str) -> Outcome {
  if let (Some(tag), Some(commit)) = (tag, commit_hash) {
    if store.is_pending(tag, commit) {
      tracing::warn!(tag, commit, source, "event for a release still being published, dropped");
      return Outcome::Ignored(IgnoreReason::Pending);
    }
  }
  tracing::info!(tag = ?tag, commit = ?commit_hash, source, "no matching release");
  Outcome::Ignored(IgnoreReason::NoMatch)
}

/// Edit ordering for one record's message.
#[derive(Default)]
struct EditSlot {
  /// Revision of the newest edit requested.
  latest: AtomicU64,
  /// Held while an edit is in flight.
  sending: tokio::sync::Mutex<()>,
}

/// Applies in-place message edits one at a time per record. An edit that is
/// overtaken while waiting its turn is skipped; the one that runs renders the
/// record as it is at send time.
#[derive(Clone)]
struct MessageEditor {
  store: Arc<Mutex<ReleaseStore>>,
  notifier: Arc<dyn Notifier>,
  channel: String,
  timeout: Duration,
  slots: Arc<Mutex<HashMap<RecordId, Arc<EditSlot>>>>,
}

impl MessageEditor {
  fn slot(&self, id: RecordId) -> Arc<EditSlot> {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(slots.entry(id).or_default())
  }

  fn next_revision(&self, id: RecordId) -> u64 {
    self.slot(id).latest.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Queue an edit in the background. `last_known` is rendered if the record
  /// has left the store by the time the edit runs.
  fn spawn(&self, id: RecordId, last_known: Option<ReleaseRecord>) {
    let revision = self.next_revision(id);
    let editor = self.clone();
    tokio::spawn(async move {
      if let Err(e) = editor.send(id, revision, last_known).await {
        tracing::warn!(record_id = %id, error = %e, "slack update failed");
      }
    });
  }

  /// `Ok(false)` when a newer edit superseded this one.
  async fn send(&self, id: RecordId, revision: u64, last_known: Option<ReleaseRecord>) -> Result<bool, EngineError> {
    let slot = self.slot(id);
    let _sending = slot.sending.lock().await;
    if slot.latest.load(Ordering::SeqCst) != revision {
      tracing::debug!(record_id = %id, revision, "slack update superseded");
      return Ok(false);
    }

    let current = lock_store(&self.store).get(id).cloned();
    let record = match current {
      Some(record) => record,
      None => {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        last_known.ok_or_else(|| EngineError::notify(format!("record {} not found", id)))?
      }
    };
    let reference = record
      .notification_ref
      .as_ref()
      .ok_or_else(|| EngineError::notify("record has no message to update"))?;
    let message = format::render(&record, &self.channel);
    bounded("slack update", self.timeout, self.notifier.update(reference, &message)).await?;
    Ok(true)
  }
}

/// Run `fut` with a deadline; a timeout becomes [`EngineError::Timeout`].
async fn bounded<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T, EngineError>
where
  F: Future<Output = Result<T, EngineError>>,
{
  match tokio::time::timeout(after, fut).await {
    Ok(result) => result,
    Err(_) => Err(EngineError::Timeout { operation, after }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::digest::DigestResolver;
  use crate::notify::LogNotifier;
  use async_trait::async_trait;
  use chrono::TimeZone;

  struct NoDigest;

  #[async_trait]
  impl DigestResolver for NoDigest {
    async fn resolve(&self, _output_url: &str) -> Result<Option<String>, EngineError> {
      Ok(None)
    }
  }

  fn engine() -> Engine {
    Engine::new(Config::default(), Arc::new(LogNotifier::new()), Arc::new(NoDigest))
  }

  fn tag(tag: &str, commit: &str) -> TagEvent {
    TagEvent {
      tag: tag.into(),
      commit_hash: commit.into(),
      sender: "alice".into(),
      repo_owner: "org".into(),
      repo_name: "ui".into(),
      repo_url: "https://github.com/org/ui".into(),
    }
  }

  fn build(n: u64, status: BuildStatus) -> BuildEvent {
    BuildEvent {
      tag: Some("v1.2.0".into()),
      commit_hash: Some("abc123".into()),
      build_number: n,
      status,
      build_time_millis: None,
      build_url: None,
      image_pushed_at: None,
      digest_url: None,
    }
  }

  async fn published(engine: &Engine, event: TagEvent) -> RecordId {
    match engine.admit_tag(event) {
      Admission::Pending(p) => engine.publish(p).await.unwrap(),
      Admission::Ignored(r) => panic!("unexpected ignore: {:?}", r),
    }
  }

  #[tokio::test]
  async fn record_invisible_until_published() {
    let engine = engine();
    let pending = match engine.admit_tag(tag("v1.2.0", "abc123")) {
      Admission::Pending(p) => p,
      Admission::Ignored(r) => panic!("unexpected ignore: {:?}", r),
    };
    assert_eq!(pending.record().tag, "v1.2.0");
    assert!(engine.find_by_tag("v1.2.0", "abc123").is_none());
    assert_eq!(
      engine.on_build(build(42, BuildStatus::Succeeded)),
      Outcome::Ignored(IgnoreReason::Pending)
    );
    assert!(matches!(
      engine.admit_tag(tag("v1.2.0", "abc123")),
      Admission::Ignored(IgnoreReason::Duplicate)
    ));

    let id = engine.publish(pending).await.unwrap();
    let view = engine.find_by_tag("v1.2.0", "abc123").unwrap();
    assert_eq!(view.id, id);
    assert_eq!(view.record.notification_ref.unwrap().ts, "local.1");
  }

  #[tokio::test]
  async fn progress_touch_claims_record_for_build_number() {
    let engine = engine();
    published(&engine, tag("v1.2.0", "abc123")).await;

    let outcome = engine.on_build_progress(BuildProgress {
      tag: "v1.2.0".into(),
      commit_hash: "abc123".into(),
      build_number: 42,
      build_url: Some("https://circleci.com/gh/org/ui/42".into()),
    });
    let Outcome::Updated(view) = outcome else {
      panic!("expected update");
    };
    assert_eq!(view.stage, Stage::Building);
    assert_eq!(view.record.build_status, Some(BuildStatus::Pending));

    // Completion without tag/commit still lands via build number.
    let mut done = build(42, BuildStatus::Succeeded);
    done.tag = None;
    done.commit_hash = None;
    let Outcome::Updated(view) = engine.on_build(done) else {
      panic!("expected update");
    };
    assert_eq!(view.stage, Stage::Built);
    assert_eq!(view.record.build_url.as_deref(), Some("https://circleci.com/gh/org/ui/42"));
  }

  #[tokio::test]
  async fn late_progress_does_not_downgrade() {
    let engine = engine();
    published(&engine, tag("v1.2.0", "abc123")).await;
    engine.on_build(build(42, BuildStatus::Succeeded));
    let outcome = engine.on_build_progress(BuildProgress {
      tag: "v1.2.0".into(),
      commit_hash: "abc123".into(),
      build_number: 42,
      build_url: None,
    });
    let Outcome::Updated(view) = outcome else {
      panic!("expected update");
    };
    assert_eq!(view.record.build_status, Some(BuildStatus::Succeeded));
  }

  #[tokio::test]
  async fn registry_match_respects_custom_matcher() {
    struct Never;
    impl PushTimeMatcher for Never {
      fn matches(&self, _: chrono::DateTime<Utc>, _: chrono::DateTime<Utc>) -> bool {
        false
      }
    }

    let engine = engine().with_matcher(Never);
    published(&engine, tag("v1.2.0", "abc123")).await;
    let at = Utc.with_ymd_and_hms(2025, 1, 15, 10, 31, 0).unwrap();
    let mut done = build(42, BuildStatus::Succeeded);
    done.image_pushed_at = Some(at);
    engine.on_build(done);

    let outcome = engine.on_registry(RegistryEvent {
      pushed_at: at,
      repo_url: "https://hub.docker.com/r/org/ui".into(),
      repo_name: None,
      status: "Active".into(),
      image_tag: None,
    });
    assert_eq!(outcome, Outcome::Ignored(IgnoreReason::NoMatch));
  }

  #[tokio::test]
  async fn refresh_needs_a_live_record() {
    let engine = engine();
    let id = published(&engine, tag("v1.2.0", "abc123")).await;
    engine.refresh_notification(id).await.unwrap();
    engine.on_build(build(42, BuildStatus::Failed));
    assert!(engine.refresh_notification(id).await.is_err());
  }

  #[tokio::test]
  async fn bounded_times_out() {
    let slow = async {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok::<_, EngineError>(())
    };
    let err = bounded("slow call", Duration::from_millis(10), slow).await.unwrap_err();
    assert!(matches!(err, EngineError::Timeout { operation: "slow call", .. }));
  }
}
