//! Push-time matching between a build's push step and a Docker Hub push.
//!
//! Docker Hub notifications carry no tag, commit or build number, so the only
//! thing tying them to a release is *when* the image landed. The default
//! [`MinuteMatcher`] compares the two times at minute granularity.
//!
//! Known collision: two builds whose push steps finish inside the same
//! wall-clock minute are indistinguishable. The store is scanned in insertion
//! order and the first record wins, so the second build's image may be
//! attributed to the first release. Swap in a stronger matcher if the
//! registry ever reports a build identity.

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Decides whether a recorded push time and an observed registry push are the
/// same push.
pub trait PushTimeMatcher: Send + Sync {
  fn matches(&self, recorded: DateTime<Utc>, observed: DateTime<Utc>) -> bool;
}

/// Same wall-clock minute (UTC).
#[derive(Debug, Clone, Copy, Default)]
pub struct MinuteMatcher;

impl PushTimeMatcher for MinuteMatcher {
  fn matches(&self, recorded: DateTime<Utc>, observed: DateTime<Utc>) -> bool {
    truncate_to_minute(recorded) == truncate_to_minute(observed)
  }
}

/// Drop seconds and sub-seconds.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
  ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}
