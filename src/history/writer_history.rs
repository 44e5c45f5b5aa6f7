use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, trace};

use crate::{
  dds::qos::{policy, QosPolicies},
  history::change_pool::{CacheChangePool, ChangeSlot},
  structure::{
    cache_change::CacheChange, instance_handle::InstanceHandle, sequence_number::SequenceNumber,
  },
};

/// Why a change could not be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddChangeError {
  /// Full of changes some reliable reader still has to acknowledge.
  WouldBlock,
  /// A hard limit: pool exhausted, payload too big, or too many instances.
  OutOfResources,
}

/// Result of a successful `add_change`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedChange {
  pub sequence_number: SequenceNumber,
  /// Changes removed to make room, oldest first.
  pub evicted: Vec<SequenceNumber>,
}

/// The changes of one writer, ordered by sequence number.
///
/// Sequence numbers are assigned here: strictly increasing and contiguous,
/// starting at 1.
pub struct WriterHistory {
  pool: CacheChangePool,
  changes: VecDeque<(SequenceNumber, ChangeSlot)>,
  history: policy::History,
  resource_limits: policy::ResourceLimits,
  last_sn: SequenceNumber,
  instances: BTreeMap<InstanceHandle, usize>,
}

impl WriterHistory {
  pub fn new(qos: &QosPolicies, pool: CacheChangePool) -> Self {
    Self {
      pool,
      changes: VecDeque::new(),
      history: qos.history_or_default(),
      resource_limits: qos.resource_limits_or_default(),
      last_sn: SequenceNumber::ZERO,
      instances: BTreeMap::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.changes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.changes.is_empty()
  }

  /// Last sequence number handed out, 0 before the first change.
  pub fn last_sequence_number(&self) -> SequenceNumber {
    self.last_sn
  }

  pub fn next_sequence_number(&self) -> SequenceNumber {
    self.last_sn.next()
  }

  pub fn min_sn(&self) -> Option<SequenceNumber> {
    self.changes.front().map(|(sn, _)| *sn)
  }

  pub fn max_sn(&self) -> Option<SequenceNumber> {
    self.changes.back().map(|(sn, _)| *sn)
  }

  fn position(&self, sn: SequenceNumber) -> Option<usize> {
    self
      .changes
      .binary_search_by_key(&sn, |(s, _)| *s)
      .ok()
  }

  pub fn contains(&self, sn: SequenceNumber) -> bool {
    self.position(sn).is_some()
  }

  pub fn get_change(&self, sn: SequenceNumber) -> Option<&CacheChange> {
    self
      .position(sn)
      .and_then(|i| self.pool.get(self.changes[i].1))
  }

  pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
    let pool = &self.pool;
    self.changes.iter().filter_map(move |(_, slot)| pool.get(*slot))
  }

  pub fn sequence_numbers(&self) -> BTreeSet<SequenceNumber> {
    self.changes.iter().map(|(sn, _)| *sn).collect()
  }

  fn instance_count(&self, instance: &InstanceHandle) -> usize {
    self.instances.get(instance).copied().unwrap_or(0)
  }

  /// Adds `change`, assigning the next sequence number.
  ///
  /// `acked_below`: every change with a smaller sequence number is
  /// acknowledged by all reliable readers and may be evicted.
  ///
  /// Nothing is modified when an error is returned.
  pub fn add_change(
    &mut self,
    mut change: CacheChange,
    acked_below: SequenceNumber,
  ) -> Result<AddedChange, AddChangeError> {
    if !self.pool.payload_fits(&change) {
      return Err(AddChangeError::OutOfResources);
    }
    let evicted = self.plan_eviction(&change.instance_handle, acked_below)?;
    for sn in &evicted {
      self.remove_change(*sn);
    }
    let sequence_number = self.last_sn.next();
    change.sequence_number = sequence_number;
    self.insert(change).map_err(|_| AddChangeError::OutOfResources)?;
    self.last_sn = sequence_number;
    if !evicted.is_empty() {
      debug!("add_change {:?} evicted {:?}", sequence_number, evicted);
    }
    Ok(AddedChange {
      sequence_number,
      evicted,
    })
  }

  // Which changes must go for one more change of `instance` to fit.
  fn plan_eviction(
    &self,
    instance: &InstanceHandle,
    acked_below: SequenceNumber,
  ) -> Result<Vec<SequenceNumber>, AddChangeError> {
    let rl = self.resource_limits;
    let mut evict: BTreeSet<SequenceNumber> = BTreeSet::new();
    let inst_count = self.instance_count(instance);

    if inst_count == 0 {
      if let Some(max) = rl.max_instances() {
        if self.instances.len() >= max {
          return Err(AddChangeError::OutOfResources);
        }
      }
    }

    let per_instance_limit = match self.history {
      policy::History::KeepLast { depth } => {
        let depth = depth.max(1) as usize;
        Some(
          rl.max_samples_per_instance()
            .map_or(depth, |m| m.min(depth)),
        )
      }
      policy::History::KeepAll => rl.max_samples_per_instance(),
    };
    let keep_last = matches!(self.history, policy::History::KeepLast { .. });

    if let Some(limit) = per_instance_limit {
      let mut excess = (inst_count + 1).saturating_sub(limit);
      for (sn, slot) in &self.changes {
        if excess == 0 {
          break;
        }
        if self.pool.get(*slot).map(|c| &c.instance_handle) == Some(instance) {
          if !keep_last && *sn >= acked_below {
            return Err(AddChangeError::WouldBlock);
          }
          evict.insert(*sn);
          excess -= 1;
        }
      }
    }

    let total_limit = rl.max_samples();
    let pool_full = !self.pool.has_room();
    let mut over_total = match total_limit {
      Some(max) => (self.changes.len() + 1).saturating_sub(evict.len()).saturating_sub(max),
      None => 0,
    };
    if pool_full && evict.is_empty() && over_total == 0 {
      over_total = 1;
    }
    if over_total > 0 {
      for (sn, _) in &self.changes {
        if over_total == 0 {
          break;
        }
        if evict.contains(sn) {
          continue;
        }
        if *sn >= acked_below {
          return Err(AddChangeError::WouldBlock);
        }
        evict.insert(*sn);
        over_total -= 1;
      }
      if over_total > 0 {
        return Err(AddChangeError::OutOfResources);
      }
    }
    trace!("plan_eviction for {:?}: {:?}", instance, evict);
    Ok(evict.into_iter().collect())
  }

  fn insert(&mut self, change: CacheChange) -> crate::dds::result::Result<()> {
    let sn = change.sequence_number;
    let instance = change.instance_handle;
    let slot = self.pool.reserve(change)?;
    match self.changes.back() {
      Some((last, _)) if *last > sn => {
        let pos = self.changes.partition_point(|(s, _)| *s < sn);
        self.changes.insert(pos, (sn, slot));
      }
      _ => self.changes.push_back((sn, slot)),
    }
    *self.instances.entry(instance).or_insert(0) += 1;
    Ok(())
  }

  /// Puts back a change with its original sequence number, as loaded from
  /// persistent storage.
  pub fn restore_change(&mut self, change: CacheChange) -> crate::dds::result::Result<()> {
    let sn = change.sequence_number;
    if self.contains(sn) {
      return Ok(());
    }
    self.insert(change)?;
    if sn > self.last_sn {
      self.last_sn = sn;
    }
    Ok(())
  }

  /// Restored writers continue numbering after what they had sent before.
  pub fn set_last_sequence_number(&mut self, sn: SequenceNumber) {
    if sn > self.last_sn {
      self.last_sn = sn;
    }
  }

  pub fn remove_change(&mut self, sn: SequenceNumber) -> Option<CacheChange> {
    let pos = self.position(sn)?;
    let (_, slot) = self.changes.remove(pos)?;
    let change = self.pool.release(slot)?;
    if let Some(n) = self.instances.get_mut(&change.instance_handle) {
      *n -= 1;
      if *n == 0 {
        self.instances.remove(&change.instance_handle);
      }
    }
    Some(change)
  }

  pub fn remove_min(&mut self) -> Option<CacheChange> {
    let sn = self.min_sn()?;
    self.remove_change(sn)
  }

  /// Removes every change, oldest first.
  pub fn remove_all(&mut self) -> Vec<SequenceNumber> {
    let sns: Vec<SequenceNumber> = self.changes.iter().map(|(sn, _)| *sn).collect();
    for sn in &sns {
      self.remove_change(*sn);
    }
    sns
  }
}
