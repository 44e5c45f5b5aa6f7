use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::WriterSubmessage, submessage_flag::{endianness_flag, HEARTBEAT_Flags},
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{count::Count, guid::EntityId, sequence_number::SequenceNumber},
};

/// Sent from a Writer to Readers to announce the range of sequence numbers
/// it has available. An empty history is announced as first = last + 1.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct Heartbeat {
  /// ENTITYID_UNKNOWN addresses all readers of the writer.
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub first_sn: SequenceNumber,
  pub last_sn: SequenceNumber,
  pub count: Count,
}

impl Heartbeat {
  /// RTPS spec 8.3.7.5.3: firstSN >= 1 and lastSN >= firstSN - 1, both in
  /// the sequence number range.
  pub fn is_valid(&self) -> bool {
    self.first_sn.is_valid()
      && self.last_sn <= SequenceNumber::MAX
      && self.last_sn >= self.first_sn.prev()
  }

  pub fn create_submessage(self, flags: BitFlags<HEARTBEAT_Flags>) -> Option<Submessage> {
    let content_length = match self.write_to_vec_with_ctx(endianness_flag(flags.bits())) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write heartbeat to bytes. Error: {}", e);
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::HEARTBEAT,
        flags: flags.bits(),
        content_length,
      },
      body: SubmessageBody::Writer(WriterSubmessage::Heartbeat(self, flags)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  serialization_test!( type = Heartbeat,
  {
      heartbeat,
      Heartbeat {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          first_sn: SequenceNumber::from(42),
          last_sn: SequenceNumber::from(7),
          count: Count::from(9),
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x07, 0x00, 0x00, 0x00,
            0x09, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x07,
            0x00, 0x00, 0x00, 0x09]
  });

  #[test]
  fn validity() {
    let mut hb = Heartbeat {
      reader_id: EntityId::UNKNOWN,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      first_sn: SequenceNumber::from(1),
      last_sn: SequenceNumber::from(0),
      count: Count::from(1),
    };
    assert!(hb.is_valid()); // empty history
    hb.first_sn = SequenceNumber::from(5);
    hb.last_sn = SequenceNumber::from(3);
    assert!(!hb.is_valid());
    hb.first_sn = SequenceNumber::from(0);
    assert!(!hb.is_valid());

    hb.first_sn = SequenceNumber::MAX;
    hb.last_sn = SequenceNumber::MAX;
    assert!(hb.is_valid());
    hb.last_sn = SequenceNumber::from(i64::MAX);
    assert!(!hb.is_valid());
    hb.first_sn = SequenceNumber::from(i64::MAX);
    assert!(!hb.is_valid());
  }
}
