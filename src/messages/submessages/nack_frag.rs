use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::ReaderSubmessage, submessage_flag::{endianness_flag, NACKFRAG_Flags},
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    count::Count,
    guid::EntityId,
    sequence_number::{FragmentNumberSet, SequenceNumber},
  },
};

/// The NackFrag Submessage is used to communicate the state of a Reader to a
/// Writer. When a data change is sent as a series of fragments, the NackFrag
/// Submessage allows the Reader to inform the Writer about specific fragment
/// numbers it is still missing.
///
/// This Submessage can only contain negative acknowledgements.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct NackFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  /// The sequence number for which some fragments are missing.
  pub writer_sn: SequenceNumber,
  /// Fragments in the set are missing on the reader side. The ones that do
  /// not appear in the set are undetermined.
  pub fragment_number_state: FragmentNumberSet,
  pub count: Count,
}

impl NackFrag {
  pub fn is_valid(&self) -> bool {
    self.writer_sn.is_valid() && self.fragment_number_state.is_valid()
  }

  pub fn create_submessage(self, flags: BitFlags<NACKFRAG_Flags>) -> Option<Submessage> {
    let content_length = match self.write_to_vec_with_ctx(endianness_flag(flags.bits())) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Reader couldn't write nack_frag to bytes. Error: {}", e);
        return None;
      }
    };
    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::NACK_FRAG,
        flags: flags.bits(),
        content_length,
      },
      body: SubmessageBody::Reader(ReaderSubmessage::NackFrag(self, flags)),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::structure::sequence_number::FragmentNumber;

  serialization_test!( type = NackFrag,
  {
      nack_frag,
      NackFrag {
          reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
          writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
          writer_sn: SequenceNumber::from(42),
          fragment_number_state: FragmentNumberSet::new_empty(FragmentNumber::new(1000)),
          count: Count::from(6),
      },
      le = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x2A, 0x00, 0x00, 0x00,
            0xE8, 0x03, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x06, 0x00, 0x00, 0x00],
      be = [0x00, 0x00, 0x03, 0xC7,
            0x00, 0x00, 0x03, 0xC2,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x2A,
            0x00, 0x00, 0x03, 0xE8,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x06]
  });

  #[test]
  fn fragment_zero_is_not_a_valid_base() {
    let mut nf = NackFrag {
      reader_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_READER,
      writer_id: EntityId::SEDP_BUILTIN_PUBLICATIONS_WRITER,
      writer_sn: SequenceNumber::from(42),
      fragment_number_state: FragmentNumberSet::new_empty(FragmentNumber::new(1)),
      count: Count::from(1),
    };
    assert!(nf.is_valid());
    nf.fragment_number_state = FragmentNumberSet::new_empty(FragmentNumber::new(0));
    assert!(!nf.is_valid());
  }
}
