//! In-memory release record store.
//!
//! A plain vector scanned linearly: there is one record per in-flight release,
//! so predicate scans are cheap. The store is not synchronized itself; the
//! engine owns it behind a single mutex so every lookup-then-mutate runs as one
//! critical section.
//!
//! Creation is two-phase. [`ReleaseStore::reserve`] claims a (tag, commit) pair
//! while its Slack message is in flight, and only [`ReleaseStore::commit_pending`]
//! makes the record visible to correlation.

use serde::Serialize;

use crate::identity::{LookupPlan, ReleaseIdentity};
use crate::matcher::PushTimeMatcher;
use crate::types::{ReleaseRecord, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A record as exposed to callers: id, derived stage, then the record fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReleaseView {
  pub id: RecordId,
  pub stage: Stage,
  #[serde(flatten)]
  pub record: ReleaseRecord,
}

impl ReleaseView {
  pub fn new(id: RecordId, record: ReleaseRecord) -> Self {
    Self {
      id,
      stage: record.stage(),
      record,
    }
  }
}

#[derive(Debug, Default)]
pub struct ReleaseStore {
  records: Vec<(RecordId, ReleaseRecord)>,
  /// (tag, commit) pairs waiting for their Slack message.
  pending: Vec<(String, String)>,
  next_id: u64,
}

impl ReleaseStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn create(&mut self, record: ReleaseRecord) -> RecordId {
    self.next_id += 1;
    let id = RecordId(self.next_id);
    self.records.push((id, record));
    id
  }

  pub fn get(&self, id: RecordId) -> Option<&ReleaseRecord> {
    self
      .records
      .iter()
      .find(|(rid, _)| *rid == id)
      .map(|(_, r)| r)
  }

  /// First record (in insertion order) satisfying `predicate`.
  pub fn find<P>(&self, predicate: P) -> Option<RecordId>
  where
    P: Fn(&ReleaseRecord) -> bool,
  {
    self
      .records
      .iter()
      .find(|(_, r)| predicate(r))
      .map(|(id, _)| *id)
  }

  /// Try each predicate of `plan` in order against every record.
  pub fn find_plan(&self, plan: &LookupPlan, matcher: &dyn PushTimeMatcher) -> Option<RecordId> {
    plan.predicates().iter().find_map(|predicate| {
      self.find(|record| predicate.matches(&ReleaseIdentity::of(record), matcher))
    })
  }

  /// Apply `mutate` to the record; returns the updated record.
  pub fn update<F>(&mut self, id: RecordId, mutate: F) -> Option<&ReleaseRecord>
  where
    F: FnOnce(&mut ReleaseRecord),
  {
    let (_, record) = self.records.iter_mut().find(|(rid, _)| *rid == id)?;
    mutate(record);
    Some(record)
  }

  pub fn delete(&mut self, id: RecordId) -> Option<ReleaseRecord> {
    let idx = self.records.iter().position(|(rid, _)| *rid == id)?;
    Some(self.records.remove(idx).1)
  }

  /// Claim a (tag, commit) pair for publication. Fails if a visible record or
  /// another pending publication already holds it.
  pub fn reserve(&mut self, tag: &str, commit_hash: &str) -> bool {
    let visible = self
      .find(|r| r.tag == tag && r.commit_hash == commit_hash)
      .is_some();
    if visible || self.is_pending(tag, commit_hash) {
      return false;
    }
    self.pending.push((tag.to_string(), commit_hash.to_string()));
    true
  }

  pub fn is_pending(&self, tag: &str, commit_hash: &str) -> bool {
    self
      .pending
      .iter()
      .any(|(t, c)| t == tag && c == commit_hash)
  }

  /// Release the reservation and make the record visible.
  pub fn commit_pending(&mut self, record: ReleaseRecord) -> RecordId {
    self.abandon_pending(&record.tag, &record.commit_hash);
    self.create(record)
  }

  pub fn abandon_pending(&mut self, tag: &str, commit_hash: &str) {
    self
      .pending
      .retain(|(t, c)| !(t == tag && c == commit_hash));
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn view(&self, id: RecordId) -> Option<ReleaseView> {
    self.get(id).map(|r| ReleaseView::new(id, r.clone()))
  }

  pub fn snapshot(&self) -> Vec<ReleaseView> {
    self
      .records
      .iter()
      .map(|(id, r)| ReleaseView::new(*id, r.clone()))
      .collect()
  }
}
