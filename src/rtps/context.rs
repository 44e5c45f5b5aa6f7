use std::{
  rc::Rc,
  time::{Duration, Instant},
};

use crate::{
  network::transport::Transport,
  rtps::timed_event::{Clock, TimedEvent, TimerId, TimerQueue, TimerTarget},
  structure::guid::GuidPrefix,
};

/// Default maximum size of one RTPS message.
pub const DEFAULT_MTU: usize = 65000;

/// What every endpoint of a participant shares: identity, time, the timer
/// queue and the way out. Cloning is cheap.
#[derive(Clone)]
pub struct ParticipantContext {
  pub guid_prefix: GuidPrefix,
  pub clock: Rc<dyn Clock>,
  pub timers: TimerQueue,
  pub transport: Rc<dyn Transport>,
  pub mtu: usize,
}

impl ParticipantContext {
  pub fn new(guid_prefix: GuidPrefix, clock: Rc<dyn Clock>, transport: Rc<dyn Transport>) -> Self {
    Self {
      guid_prefix,
      clock,
      timers: TimerQueue::new(),
      transport,
      mtu: DEFAULT_MTU,
    }
  }

  #[must_use]
  pub fn with_mtu(mut self, mtu: usize) -> Self {
    self.mtu = mtu;
    self
  }

  pub fn now(&self) -> Instant {
    self.clock.now()
  }

  pub fn schedule_after(&self, delay: Duration, target: TimerTarget, event: TimedEvent) -> TimerId {
    self.timers.schedule(self.now() + delay, target, event)
  }
}
