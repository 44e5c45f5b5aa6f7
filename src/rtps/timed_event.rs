use std::{
  cell::{Cell, RefCell},
  cmp::Reverse,
  collections::{BTreeMap, BinaryHeap},
  rc::Rc,
  time::{Duration, Instant},
};

use log::trace;

use crate::structure::guid::{EntityId, GUID};

/// Source of monotonic time for a participant.
pub trait Clock {
  fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// Clock that only moves when told to. Used to drive participants
/// deterministically.
pub struct ManualClock {
  now: Cell<Instant>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      now: Cell::new(Instant::now()),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.now.set(self.now.get() + by);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.now.get()
  }
}

/// Who a timer tick is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerTarget {
  Writer(EntityId),
  Reader(EntityId),
  Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedEvent {
  /// Periodic heartbeat of a reliable writer.
  Heartbeat,
  /// nack_response_delay elapsed for requested changes of one reader.
  SendRepairData { to_reader: GUID },
  /// UNDERWAY changes of one reader may be NACKed again.
  NackSuppressionEnd { reader: GUID },
  /// heartbeat_response_delay (or initial_acknack_delay) elapsed.
  AckNackResponse { writer: GUID },
  /// Lease of a matched writer may have expired.
  WriterLivelinessCheck { writer: GUID },
  /// Manual liveliness of a local writer may have lapsed.
  LivelinessAssertionCheck,
  SpdpAnnounce,
  ParticipantLeaseCheck,
  /// Local AUTOMATIC writers are due for a liveliness message.
  AutomaticLivelinessAssertion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
struct TimerQueueInner {
  heap: BinaryHeap<Reverse<(Instant, u64)>>,
  // Cancelled timers are removed from here and skipped when they surface
  // from the heap.
  entries: BTreeMap<u64, (TimerTarget, TimedEvent)>,
  next_id: u64,
}

impl TimerQueueInner {
  fn discard_cancelled(&mut self) {
    while let Some(Reverse((_, id))) = self.heap.peek() {
      if self.entries.contains_key(id) {
        break;
      }
      self.heap.pop();
    }
  }
}

/// Participant-wide timer queue. Endpoints schedule ticks here and the event
/// loop pops the expired ones and dispatches them one at a time.
#[derive(Clone, Default)]
pub struct TimerQueue {
  inner: Rc<RefCell<TimerQueueInner>>,
}

impl TimerQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn schedule(&self, at: Instant, target: TimerTarget, event: TimedEvent) -> TimerId {
    let mut inner = self.inner.borrow_mut();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.heap.push(Reverse((at, id)));
    inner.entries.insert(id, (target, event));
    trace!("schedule {:?} {:?} at {:?}", target, event, at);
    TimerId(id)
  }

  pub fn cancel(&self, id: TimerId) {
    self.inner.borrow_mut().entries.remove(&id.0);
  }

  /// Cancels every pending timer of `target`. Used on endpoint teardown.
  pub fn cancel_all(&self, target: TimerTarget) {
    self
      .inner
      .borrow_mut()
      .entries
      .retain(|_, (t, _)| *t != target);
  }

  pub fn is_pending(&self, id: TimerId) -> bool {
    self.inner.borrow().entries.contains_key(&id.0)
  }

  pub fn len(&self) -> usize {
    self.inner.borrow().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn next_deadline(&self) -> Option<Instant> {
    let mut inner = self.inner.borrow_mut();
    inner.discard_cancelled();
    inner.heap.peek().map(|Reverse((at, _))| *at)
  }

  /// Earliest timer due at `now`, removed from the queue.
  pub fn pop_expired(&self, now: Instant) -> Option<(TimerTarget, TimedEvent)> {
    let mut inner = self.inner.borrow_mut();
    inner.discard_cancelled();
    let due = matches!(inner.heap.peek(), Some(Reverse((at, _))) if *at <= now);
    if !due {
      return None;
    }
    let Reverse((_, id)) = inner.heap.pop()?;
    inner.entries.remove(&id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expired_timers_pop_in_deadline_order() {
    let clock = ManualClock::new();
    let q = TimerQueue::new();
    let t0 = clock.now();
    q.schedule(t0 + Duration::from_millis(20), TimerTarget::Participant, TimedEvent::SpdpAnnounce);
    q.schedule(
      t0 + Duration::from_millis(10),
      TimerTarget::Participant,
      TimedEvent::ParticipantLeaseCheck,
    );
    assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(10)));
    assert_eq!(q.pop_expired(t0), None);

    clock.advance(Duration::from_millis(25));
    assert_eq!(
      q.pop_expired(clock.now()),
      Some((TimerTarget::Participant, TimedEvent::ParticipantLeaseCheck))
    );
    assert_eq!(
      q.pop_expired(clock.now()),
      Some((TimerTarget::Participant, TimedEvent::SpdpAnnounce))
    );
    assert!(q.is_empty());
  }

  #[test]
  fn cancel_all_removes_only_that_target() {
    let now = Instant::now();
    let q = TimerQueue::new();
    let w = TimerTarget::Writer(EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER);
    let r = TimerTarget::Reader(EntityId::SEDP_BUILTIN_PUBLICATIONS_READER);
    q.schedule(now, w, TimedEvent::Heartbeat);
    q.schedule(now, w, TimedEvent::Heartbeat);
    let keep = q.schedule(now, r, TimedEvent::AckNackResponse {
      writer: GUID::GUID_UNKNOWN,
    });
    q.cancel_all(w);
    assert!(q.is_pending(keep));
    assert_eq!(q.len(), 1);
    assert_eq!(
      q.pop_expired(now),
      Some((r, TimedEvent::AckNackResponse {
        writer: GUID::GUID_UNKNOWN
      }))
    );
    assert_eq!(q.next_deadline(), None);
  }

  #[test]
  fn cancelled_timer_does_not_fire() {
    let now = Instant::now();
    let q = TimerQueue::new();
    let id = q.schedule(now, TimerTarget::Participant, TimedEvent::SpdpAnnounce);
    q.cancel(id);
    assert!(!q.is_pending(id));
    assert_eq!(q.pop_expired(now + Duration::from_secs(1)), None);
  }
}
