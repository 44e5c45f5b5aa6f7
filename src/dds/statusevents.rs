//
// Describe the communication status changes as events.
//
// These implement a mechanism equivalent to what is described in
// Section 2.2.4 Listeners, Conditions, and Wait-sets
//
// Communication statuses are detailed in Figure 2.13 and tables in Section
// 2.2.4.1 in DDS Specification v1.4

use log::trace;
use mio::Evented;
use mio_extras::channel as mio_channel;

use crate::{
  dds::qos::QosPolicyId,
  structure::guid::{GuidPrefix, GUID},
};

/// This trait corresponds to set_listener() of the Entity class in DDS spec.
/// Types implementing this trait can be registered to a poll and
/// polled for status events.
pub trait StatusEvented<E> {
  fn as_status_evented(&mut self) -> &dyn Evented;
  fn try_recv_status(&self) -> Option<E>;
}

/// Receiving end of a status channel.
pub struct StatusReceiver<E> {
  channel_receiver: mio_channel::Receiver<E>,
}

impl<E> StatusEvented<E> for StatusReceiver<E> {
  fn as_status_evented(&mut self) -> &dyn Evented {
    &self.channel_receiver
  }

  fn try_recv_status(&self) -> Option<E> {
    self.channel_receiver.try_recv().ok()
  }
}

impl<E> Iterator for StatusReceiver<E> {
  type Item = E;

  fn next(&mut self) -> Option<E> {
    self.try_recv_status()
  }
}

/// Sending end of a status channel, held by an endpoint. Sending never
/// blocks: when nobody listens or the channel is full, the event is dropped
/// and only the counters remember it.
pub struct StatusChannelSender<E> {
  sender: Option<mio_channel::SyncSender<E>>,
}

impl<E: std::fmt::Debug> StatusChannelSender<E> {
  pub fn disconnected() -> Self {
    Self { sender: None }
  }

  pub fn send(&self, event: E) {
    if let Some(sender) = &self.sender {
      if let Err(e) = sender.try_send(event) {
        trace!("Status event not delivered: {:?}", e);
      }
    }
  }
}

pub const STATUS_CHANNEL_CAPACITY: usize = 64;

pub fn status_channel<E>() -> (StatusChannelSender<E>, StatusReceiver<E>) {
  let (sender, channel_receiver) = mio_channel::sync_channel(STATUS_CHANNEL_CAPACITY);
  (
    StatusChannelSender {
      sender: Some(sender),
    },
    StatusReceiver { channel_receiver },
  )
}

/// Lifecycle of a remote participant as seen by the discovery database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
  Discovered,
  ChangedQos,
  Removed,
  Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainParticipantStatus {
  ParticipantDiscovered {
    guid_prefix: GuidPrefix,
    state: ParticipantState,
  },
  /// Removed by an explicit dispose or dropped after lease expiry.
  ParticipantLost {
    guid_prefix: GuidPrefix,
    state: ParticipantState,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataReaderStatus {
  /// Sample was rejected, because resource limits would have been exceeded.
  SampleRejected {
    count: CountWithChange,
    last_reason: SampleRejectedStatusKind,
  },
  /// Remote Writer has become active or inactive.
  LivelinessChanged {
    alive_total: CountWithChange,
    not_alive_total: CountWithChange,
    writer: GUID,
  },
  /// This DataReader has requested a QoS policy that is incompatible with what
  /// is offered.
  RequestedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    writer: GUID,
  },
  /// A sample has been lost (never received).
  SampleLost { count: CountWithChange },

  /// The DataReader has found a DataWriter that matches the Topic and has
  /// compatible QoS, or has ceased to be matched with a DataWriter that was
  /// previously considered to be matched.
  SubscriptionMatched {
    total: CountWithChange,
    current: CountWithChange,
    writer: GUID,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataWriterStatus {
  LivelinessLost {
    count: CountWithChange,
  },
  OfferedIncompatibleQos {
    count: CountWithChange,
    last_policy_id: QosPolicyId,
    reader: GUID,
  },
  PublicationMatched {
    total: CountWithChange,
    current: CountWithChange,
    reader: GUID,
  },
}

/// Helper to contain same count actions across statuses
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CountWithChange {
  // 2.3. Platform Specific Model defines these as "long", which appears to be 32-bit signed.
  count: i32,
  count_change: i32,
}

impl CountWithChange {
  pub fn new(count: i32, count_change: i32) -> Self {
    Self {
      count,
      count_change,
    }
  }

  pub fn count(&self) -> i32 {
    self.count
  }

  pub fn count_change(&self) -> i32 {
    self.count_change
  }

  pub fn add(&mut self, n: i32) {
    self.count += n;
    self.count_change += n;
  }

  pub fn increase(&mut self) {
    self.add(1);
  }

  pub fn decrease(&mut self) {
    self.add(-1);
  }

  /// Returns the current value and resets the change, as reading a status
  /// does in DDS.
  pub fn take(&mut self) -> Self {
    let r = *self;
    self.count_change = 0;
    r
  }
}

// sample rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRejectedStatusKind {
  NotRejected,
  ByInstancesLimit,
  BySamplesLimit,
  BySamplesPerInstanceLimit,
}

/// Status counters kept by a writer.
#[derive(Debug, Clone, Default)]
pub struct WriterStatusCounters {
  pub publication_matched_total: CountWithChange,
  pub publication_matched_current: CountWithChange,
  pub offered_incompatible_qos: CountWithChange,
  pub liveliness_lost: CountWithChange,
}

/// Status counters kept by a reader.
#[derive(Debug, Clone, Default)]
pub struct ReaderStatusCounters {
  pub subscription_matched_total: CountWithChange,
  pub subscription_matched_current: CountWithChange,
  pub requested_incompatible_qos: CountWithChange,
  pub sample_lost: CountWithChange,
  pub sample_rejected: CountWithChange,
  pub liveliness_alive: CountWithChange,
  pub liveliness_not_alive: CountWithChange,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn count_with_change_take_resets_change() {
    let mut c = CountWithChange::default();
    c.increase();
    c.increase();
    c.decrease();
    let snap = c.take();
    assert_eq!(snap.count(), 1);
    assert_eq!(snap.count_change(), 1);
    assert_eq!(c.count_change(), 0);
    assert_eq!(c.count(), 1);
  }

  #[test]
  fn channel_delivers_and_disconnected_drops() {
    let (tx, rx) = status_channel::<DataWriterStatus>();
    tx.send(DataWriterStatus::LivelinessLost {
      count: CountWithChange::new(1, 1),
    });
    assert_eq!(
      rx.try_recv_status(),
      Some(DataWriterStatus::LivelinessLost {
        count: CountWithChange::new(1, 1)
      })
    );
    assert_eq!(rx.try_recv_status(), None);

    StatusChannelSender::<DataWriterStatus>::disconnected().send(
      DataWriterStatus::LivelinessLost {
        count: CountWithChange::new(1, 1),
      },
    );
  }

  #[test]
  fn full_channel_does_not_block() {
    let (tx, rx) = status_channel::<DataReaderStatus>();
    for i in 0..(STATUS_CHANNEL_CAPACITY as i32 + 10) {
      tx.send(DataReaderStatus::SampleLost {
        count: CountWithChange::new(i, 1),
      });
    }
    assert_eq!(rx.count(), STATUS_CHANNEL_CAPACITY);
  }
}
