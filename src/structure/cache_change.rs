use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::structure::{
  guid::GUID, instance_handle::InstanceHandle, sequence_number::SequenceNumber, time::Timestamp,
};

/// Kind of a change, RTPS spec 8.2.1.2. The non-alive kinds travel on the
/// wire as PID_STATUS_INFO in the inline QoS of DATA.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
  Alive,
  NotAliveDisposed,
  NotAliveUnregistered,
  NotAliveDisposedUnregistered,
}

impl ChangeKind {
  const DISPOSED_FLAG: u8 = 0b01;
  const UNREGISTERED_FLAG: u8 = 0b10;

  pub fn is_alive(self) -> bool {
    self == Self::Alive
  }

  /// The 4 octets of StatusInfo_t (RTPS spec 9.6.3.9). Flags are in the
  /// last octet.
  pub fn to_status_info(self) -> [u8; 4] {
    let flags = match self {
      Self::Alive => 0,
      Self::NotAliveDisposed => Self::DISPOSED_FLAG,
      Self::NotAliveUnregistered => Self::UNREGISTERED_FLAG,
      Self::NotAliveDisposedUnregistered => Self::DISPOSED_FLAG | Self::UNREGISTERED_FLAG,
    };
    [0, 0, 0, flags]
  }

  pub fn from_status_info(status_info: [u8; 4]) -> Self {
    let flags = status_info[3];
    match (
      flags & Self::DISPOSED_FLAG != 0,
      flags & Self::UNREGISTERED_FLAG != 0,
    ) {
      (false, false) => Self::Alive,
      (true, false) => Self::NotAliveDisposed,
      (false, true) => Self::NotAliveUnregistered,
      (true, true) => Self::NotAliveDisposedUnregistered,
    }
  }
}

impl Default for ChangeKind {
  fn default() -> Self {
    Self::Alive
  }
}

/// One sample (or instance state transition) of a writer.
///
/// CacheChanges are owned by a `CacheChangePool`; everything else refers to
/// them by slot id or by sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheChange {
  pub kind: ChangeKind,
  pub writer_guid: GUID,
  pub instance_handle: InstanceHandle,
  pub sequence_number: SequenceNumber,
  /// Serialized payload including the 4-byte encapsulation header. Empty for
  /// key-only changes.
  pub data_value: Bytes,
  pub source_timestamp: Option<Timestamp>,
  /// Reader side only.
  pub is_read: bool,
}

impl CacheChange {
  pub fn new(
    kind: ChangeKind,
    writer_guid: GUID,
    instance_handle: InstanceHandle,
    sequence_number: SequenceNumber,
    data_value: Bytes,
  ) -> Self {
    Self {
      kind,
      writer_guid,
      instance_handle,
      sequence_number,
      data_value,
      source_timestamp: None,
      is_read: false,
    }
  }

  #[must_use]
  pub fn with_source_timestamp(mut self, ts: Option<Timestamp>) -> Self {
    self.source_timestamp = ts;
    self
  }

  pub fn payload_size(&self) -> usize {
    self.data_value.len()
  }

  /// Back to the state of a freshly reserved slot.
  pub(crate) fn clear(&mut self) {
    *self = Self {
      sequence_number: SequenceNumber::ZERO,
      writer_guid: GUID::GUID_UNKNOWN,
      ..Self::default()
    };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_info_flags() {
    for kind in &[
      ChangeKind::Alive,
      ChangeKind::NotAliveDisposed,
      ChangeKind::NotAliveUnregistered,
      ChangeKind::NotAliveDisposedUnregistered,
    ] {
      assert_eq!(ChangeKind::from_status_info(kind.to_status_info()), *kind);
    }
    assert_eq!(ChangeKind::NotAliveDisposed.to_status_info(), [0, 0, 0, 1]);
  }

  #[test]
  fn clear_resets_identity() {
    let mut cc = CacheChange::new(
      ChangeKind::Alive,
      GUID::new_participant_guid(),
      InstanceHandle::NIL,
      SequenceNumber::from(7),
      Bytes::from_static(&[0, 1, 0, 0, 9]),
    );
    cc.clear();
    assert_eq!(cc.sequence_number, SequenceNumber::ZERO);
    assert_eq!(cc.writer_guid, GUID::GUID_UNKNOWN);
    assert!(cc.data_value.is_empty());
  }
}
