use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::ReaderSubmessage, submessage_flag::{endianness_flag, ACKNACK_Flags},
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{count::Count, guid::EntityId, sequence_number::SequenceNumberSet},
};

/// This Submessage is used to communicate the state of a Reader to a
/// Writer.
///
/// The Submessage allows the Reader to inform the Writer about
/// the sequence numbers it has received and which ones it is still
/// missing. This Submessage can be used to do both positive
/// and negative acknowledgments
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct AckNack {
  /// Identifies the Reader entity that acknowledges receipt of certain
  /// sequence numbers and/or requests to receive certain sequence numbers.
  pub reader_id: EntityId,

  /// Identifies the Writer entity that is the target of the AckNack message.
  pub writer_id: EntityId,

  /// All sequence numbers up to the one prior to readerSNState.base
  /// are confirmed as received by the reader. The sequence numbers that
  /// appear in the set are missing on the reader side.
  pub reader_sn_state: SequenceNumberSet,

  /// Incremented each time a new AckNack message is sent, so that the
  /// Writer can detect duplicates.
  pub count: Count,
}

impl AckNack {
  pub fn is_valid(&self) -> bool {
    self.reader_sn_state.is_valid()
  }

  pub fn create_submessage(self, flags: BitFlags<ACKNACK_Flags>) -> Option<Submessage> {
    let content_length = match self.write_to_vec_with_ctx(endianness_flag(flags.bits())) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Reader couldn't write acknack to bytes. Error: {}", e);
        return None;
      }
    };

    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::ACKNACK,
        flags: flags.bits(),
        content_length,
      },
      body: SubmessageBody::Reader(ReaderSubmessage::AckNack(self, flags)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::sequence_number::SequenceNumber;

  serialization_test!( type = AckNack,
  {
      acknack_empty_set,
      AckNack {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(1)),
          count: Count::from(1),
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01]
  });

  #[test]
  fn submessage_length_matches_body() {
    let mut set = SequenceNumberSet::new(SequenceNumber::from(2), 2);
    set.insert(SequenceNumber::from(3));
    let sub = AckNack {
      reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      reader_sn_state: set,
      count: Count::from(4),
    }
    .create_submessage(ACKNACK_Flags::Endianness.into())
    .unwrap();
    assert_eq!(sub.header.content_length, 4 + 4 + 8 + 4 + 4 + 4);
  }

  #[test]
  fn base_must_be_a_valid_sequence_number() {
    let mut acknack = AckNack {
      reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      reader_sn_state: SequenceNumberSet::new_empty(SequenceNumber::from(1)),
      count: Count::from(1),
    };
    assert!(acknack.is_valid());
    acknack.reader_sn_state = SequenceNumberSet::new_empty(SequenceNumber::from(0));
    assert!(!acknack.is_valid());
    acknack.reader_sn_state = SequenceNumberSet::new_empty(SequenceNumber::from(i64::MAX));
    assert!(!acknack.is_valid());
  }
}
