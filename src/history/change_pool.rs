use log::{error, warn};

use crate::{
  dds::result::{Error, Result},
  structure::cache_change::CacheChange,
};

/// Stable id of a pool slot. The generation detects use after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeSlot {
  index: u32,
  generation: u32,
}

#[derive(Debug)]
struct Slot {
  generation: u32,
  in_use: bool,
  change: CacheChange,
}

/// Growable arena of CacheChanges.
///
/// `max_pool_size` 0 means unbounded. `payload_max_size` 0 means no payload
/// limit.
#[derive(Debug)]
pub struct CacheChangePool {
  slots: Vec<Slot>,
  free: Vec<u32>,
  max_pool_size: usize,
  payload_max_size: usize,
}

impl CacheChangePool {
  pub fn new(max_pool_size: usize, payload_max_size: usize) -> Self {
    Self {
      slots: Vec::new(),
      free: Vec::new(),
      max_pool_size,
      payload_max_size,
    }
  }

  pub fn unbounded() -> Self {
    Self::new(0, 0)
  }

  pub fn in_use(&self) -> usize {
    self.slots.len() - self.free.len()
  }

  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Can one more change be reserved?
  pub fn has_room(&self) -> bool {
    !self.free.is_empty() || self.max_pool_size == 0 || self.slots.len() < self.max_pool_size
  }

  pub fn payload_fits(&self, change: &CacheChange) -> bool {
    self.payload_max_size == 0 || change.payload_size() <= self.payload_max_size
  }

  /// Stores `change` in a free slot, growing the pool if allowed.
  pub fn reserve(&mut self, change: CacheChange) -> Result<ChangeSlot> {
    if !self.payload_fits(&change) {
      warn!(
        "Payload of {} bytes exceeds payload_max_size {}",
        change.payload_size(),
        self.payload_max_size
      );
      return Err(Error::OutOfResources);
    }
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.in_use = true;
      slot.change = change;
      return Ok(ChangeSlot {
        index,
        generation: slot.generation,
      });
    }
    if self.max_pool_size != 0 && self.slots.len() >= self.max_pool_size {
      return Err(Error::OutOfResources);
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      generation: 0,
      in_use: true,
      change,
    });
    Ok(ChangeSlot {
      index,
      generation: 0,
    })
  }

  fn live_slot(&self, id: ChangeSlot) -> Option<&Slot> {
    self
      .slots
      .get(id.index as usize)
      .filter(|s| s.in_use && s.generation == id.generation)
  }

  pub fn get(&self, id: ChangeSlot) -> Option<&CacheChange> {
    self.live_slot(id).map(|s| &s.change)
  }

  pub fn get_mut(&mut self, id: ChangeSlot) -> Option<&mut CacheChange> {
    self
      .slots
      .get_mut(id.index as usize)
      .filter(|s| s.in_use && s.generation == id.generation)
      .map(|s| &mut s.change)
  }

  /// Clears the change and returns the slot to the free list, handing back
  /// the change that was stored there. Releasing a stale id is a bug in the
  /// caller: it asserts in debug builds and does nothing otherwise.
  pub fn release(&mut self, id: ChangeSlot) -> Option<CacheChange> {
    let valid = self.live_slot(id).is_some();
    debug_assert!(valid, "release of stale change slot {:?}", id);
    if !valid {
      error!("Release of stale change slot {:?} ignored", id);
      return None;
    }
    let slot = &mut self.slots[id.index as usize];
    let change = std::mem::take(&mut slot.change);
    slot.change.clear();
    slot.in_use = false;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index);
    Some(change)
  }
}
