use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, trace};

use crate::{
  dds::{
    qos::{policy, QosPolicies},
    statusevents::SampleRejectedStatusKind,
  },
  history::change_pool::{CacheChangePool, ChangeSlot},
  structure::{
    cache_change::CacheChange, guid::GUID, instance_handle::InstanceHandle,
    sequence_number::SequenceNumber,
  },
};

/// Received changes of one reader, in delivery order.
///
/// Shared with the application behind `Arc<Mutex<..>>`.
pub struct ReaderHistory {
  pool: CacheChangePool,
  changes: VecDeque<ChangeSlot>,
  history: policy::History,
  resource_limits: policy::ResourceLimits,
  instances: BTreeMap<InstanceHandle, usize>,
  received: BTreeSet<(GUID, SequenceNumber)>,
}

impl ReaderHistory {
  pub fn new(qos: &QosPolicies, pool: CacheChangePool) -> Self {
    Self {
      pool,
      changes: VecDeque::new(),
      history: qos.history_or_default(),
      resource_limits: qos.resource_limits_or_default(),
      instances: BTreeMap::new(),
      received: BTreeSet::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  pub fn instance_count(&self) -> usize {
    self.instances.len()
  }

  fn count_of(&self, instance: &InstanceHandle) -> usize {
    self.instances.get(instance).copied().unwrap_or(0)
  }

  /// Stores a change delivered by a writer proxy. Returns `Ok(false)` for a
  /// change that is already here. On rejection nothing is modified.
  pub fn add_change(&mut self, change: CacheChange) -> Result<bool, SampleRejectedStatusKind> {
    let key = (change.writer_guid, change.sequence_number);
    if self.received.contains(&key) {
      trace!("Duplicate change {:?} ignored", key);
      return Ok(false);
    }
    if !self.pool.payload_fits(&change) {
      return Err(SampleRejectedStatusKind::BySamplesLimit);
    }

    let instance = change.instance_handle;
    let inst_count = self.count_of(&instance);
    let rl = self.resource_limits;

    if inst_count == 0 {
      if let Some(max) = rl.max_instances() {
        if self.instances.len() >= max {
          return Err(SampleRejectedStatusKind::ByInstancesLimit);
        }
      }
    }

    let mut evict_oldest_of_instance = false;
    match self.history {
      policy::History::KeepLast { depth } => {
        let depth = depth.max(1) as usize;
        let limit = rl.max_samples_per_instance().map_or(depth, |m| m.min(depth));
        if inst_count >= limit {
          evict_oldest_of_instance = true;
        }
      }
      policy::History::KeepAll => {
        if let Some(max) = rl.max_samples_per_instance() {
          if inst_count >= max {
            return Err(SampleRejectedStatusKind::BySamplesPerInstanceLimit);
          }
        }
      }
    }

    let len_after = self.changes.len() + 1 - usize::from(evict_oldest_of_instance);
    if let Some(max) = rl.max_samples() {
      if len_after > max {
        return Err(SampleRejectedStatusKind::BySamplesLimit);
      }
    }
    if !evict_oldest_of_instance && !self.pool.has_room() {
      return Err(SampleRejectedStatusKind::BySamplesLimit);
    }

    if evict_oldest_of_instance {
      if let Some(pos) = self.position_of_oldest(&instance) {
        self.remove_at(pos);
      }
    }
    let slot = match self.pool.reserve(change) {
      Ok(slot) => slot,
      Err(e) => {
        debug!("Reader history pool reserve failed: {:?}", e);
        return Err(SampleRejectedStatusKind::BySamplesLimit);
      }
    };
    self.changes.push_back(slot);
    self.received.insert(key);
    *self.instances.entry(instance).or_insert(0) += 1;
    Ok(true)
  }

  fn position_of_oldest(&self, instance: &InstanceHandle) -> Option<usize> {
    let pool = &self.pool;
    self
      .changes
      .iter()
      .position(|slot| pool.get(*slot).map(|c| &c.instance_handle) == Some(instance))
  }

  fn remove_at(&mut self, pos: usize) -> Option<CacheChange> {
    let slot = self.changes.remove(pos)?;
    let change = self.pool.release(slot)?;
    if let Some(n) = self.instances.get_mut(&change.instance_handle) {
      *n -= 1;
      if *n == 0 {
        self.instances.remove(&change.instance_handle);
      }
    }
    Some(change)
  }

  /// Removes and returns up to `max` changes, oldest first.
  pub fn take(&mut self, max: usize) -> Vec<CacheChange> {
    let mut result = Vec::new();
    while result.len() < max {
      match self.remove_at(0) {
        Some(c) => result.push(c),
        None => break,
      }
    }
    result
  }

  pub fn take_all(&mut self) -> Vec<CacheChange> {
    self.take(usize::MAX)
  }

  /// Copies of up to `max` changes, oldest first. The changes stay in the
  /// history and are marked read; the copies show the state before.
  pub fn read(&mut self, max: usize) -> Vec<CacheChange> {
    let slots: Vec<ChangeSlot> = self.changes.iter().take(max).copied().collect();
    let mut result = Vec::with_capacity(slots.len());
    for slot in slots {
      if let Some(c) = self.pool.get_mut(slot) {
        result.push(c.clone());
        c.is_read = true;
      }
    }
    result
  }

  pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
    let pool = &self.pool;
    self.changes.iter().filter_map(move |slot| pool.get(*slot))
  }

  /// Forgets the duplicate filter entries of a writer that is gone.
  pub fn forget_writer(&mut self, writer: GUID) {
    self.received.retain(|(w, _)| *w != writer);
  }
}

#[cfg(test)]
mod tests {
  use bytes::Bytes;

  use super::*;
  use crate::{
    dds::qos::policy::{History, ResourceLimits},
    structure::{cache_change::ChangeKind, guid::GuidPrefix},
  };

  fn writer() -> GUID {
    GUID::new(GuidPrefix::new([3; 12]), crate::structure::guid::EntityId::UNKNOWN)
  }

  fn change(instance: u8, sn: i64) -> CacheChange {
    let mut key = [0u8; 16];
    key[0] = instance;
    CacheChange::new(
      ChangeKind::Alive,
      writer(),
      InstanceHandle::new(key),
      SequenceNumber::new(sn),
      Bytes::from(vec![instance, sn as u8]),
    )
  }

  fn history(h: History, rl: Option<ResourceLimits>) -> ReaderHistory {
    let mut b = QosPolicies::builder().history(h);
    if let Some(rl) = rl {
      b = b.resource_limits(rl);
    }
    ReaderHistory::new(&b.build(), CacheChangePool::unbounded())
  }

  #[test]
  fn keep_last_one_keeps_latest_per_instance() {
    let mut h = history(History::KeepLast { depth: 1 }, None);
    for sn in 1..=3 {
      assert_eq!(h.add_change(change(1, sn)), Ok(true));
    }
    h.add_change(change(2, 4)).unwrap();
    let taken = h.take_all();
    let sns: Vec<i64> = taken.iter().map(|c| i64::from(c.sequence_number)).collect();
    assert_eq!(sns, vec![3, 4]);
    assert!(h.is_empty());
  }

  #[test]
  fn duplicates_are_ignored() {
    let mut h = history(History::KeepAll, None);
    assert_eq!(h.add_change(change(1, 1)), Ok(true));
    assert_eq!(h.add_change(change(1, 1)), Ok(false));
    assert_eq!(h.len(), 1);
  }

  #[test]
  fn keep_all_limits_reject() {
    let rl = ResourceLimits {
      max_samples: 3,
      max_instances: 2,
      max_samples_per_instance: 2,
    };
    let mut h = history(History::KeepAll, Some(rl));
    h.add_change(change(1, 1)).unwrap();
    h.add_change(change(1, 2)).unwrap();
    assert_eq!(
      h.add_change(change(1, 3)),
      Err(SampleRejectedStatusKind::BySamplesPerInstanceLimit)
    );
    h.add_change(change(2, 4)).unwrap();
    assert_eq!(
      h.add_change(change(3, 5)),
      Err(SampleRejectedStatusKind::ByInstancesLimit)
    );
    assert_eq!(
      h.add_change(change(2, 6)),
      Err(SampleRejectedStatusKind::BySamplesLimit)
    );
    assert_eq!(h.len(), 3);
  }

  #[test]
  fn read_marks_and_keeps() {
    let mut h = history(History::KeepAll, None);
    h.add_change(change(1, 1)).unwrap();
    h.add_change(change(1, 2)).unwrap();
    let first = h.read(10);
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|c| !c.is_read));
    let second = h.read(1);
    assert!(second[0].is_read);
    assert_eq!(h.take(1).len(), 1);
    assert_eq!(h.len(), 1);
  }
}
