//! Release identity: every key a record is known by, and ordered lookup plans.
//!
//! A release is addressed by (tag, commit) when it is created, by build number
//! once CircleCI has claimed it, and by push minute when Docker Hub reports the
//! image. Callers describe a lookup as a [`LookupPlan`]: predicates tried in
//! priority order, most specific key first.

use chrono::{DateTime, Utc};

use crate::matcher::PushTimeMatcher;
use crate::types::ReleaseRecord;

/// All keys currently known for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseIdentity {
  pub tag: String,
  pub commit_hash: String,
  pub build_number: Option<u64>,
  pub image_pushed_at: Option<DateTime<Utc>>,
}

impl ReleaseIdentity {
  pub fn of(record: &ReleaseRecord) -> Self {
    Self {
      tag: record.tag.clone(),
      commit_hash: record.commit_hash.clone(),
      build_number: record.build_number,
      image_pushed_at: record.image_pushed_at,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPredicate {
  BuildNumber(u64),
  /// `unbuilt_only` restricts the match to records no build has claimed yet;
  /// once a build number is set it is the only build-side key.
  TagCommit {
    tag: String,
    commit_hash: String,
    unbuilt_only: bool,
  },
  PushedAt(DateTime<Utc>),
}

impl KeyPredicate {
  pub fn matches(&self, identity: &ReleaseIdentity, matcher: &dyn PushTimeMatcher) -> bool {
    match self {
      Self::BuildNumber(n) => identity.build_number == Some(*n),
      Self::TagCommit {
        tag,
        commit_hash,
        unbuilt_only,
      } => {
        identity.tag == *tag
          && identity.commit_hash == *commit_hash
          && !(*unbuilt_only && identity.build_number.is_some())
      }
      Self::PushedAt(observed) => identity
        .image_pushed_at
        .is_some_and(|recorded| matcher.matches(recorded, *observed)),
    }
  }
}

/// Predicates tried in order; the first one that hits any record wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupPlan(Vec<KeyPredicate>);

impl LookupPlan {
  /// Duplicate check for a new tag: any open record with the same pair.
  pub fn for_tag(tag: &str, commit_hash: &str) -> Self {
    Self(vec![KeyPredicate::TagCommit {
      tag: tag.to_string(),
      commit_hash: commit_hash.to_string(),
      unbuilt_only: false,
    }])
  }

  /// Build callbacks: the build number if some record already carries it,
  /// otherwise (tag, commit) among records not yet claimed by a build.
  pub fn for_build(build_number: u64, tag: Option<&str>, commit_hash: Option<&str>) -> Self {
    let mut predicates = vec![KeyPredicate::BuildNumber(build_number)];
    if let (Some(tag), Some(commit_hash)) = (tag, commit_hash) {
      predicates.push(KeyPredicate::TagCommit {
        tag: tag.to_string(),
        commit_hash: commit_hash.to_string(),
        unbuilt_only: true,
      });
    }
    Self(predicates)
  }

  pub fn for_push(pushed_at: DateTime<Utc>) -> Self {
    Self(vec![KeyPredicate::PushedAt(pushed_at)])
  }

  pub fn predicates(&self) -> &[KeyPredicate] {
    &self.0
  }
}
