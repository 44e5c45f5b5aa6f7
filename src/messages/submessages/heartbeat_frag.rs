use enumflags2::BitFlags;
use log::error;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::WriterSubmessage, submessage_flag::{endianness_flag, HEARTBEATFRAG_Flags},
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::{
    count::Count,
    guid::EntityId,
    sequence_number::{FragmentNumber, SequenceNumber},
  },
};

/// When fragmenting data and until all fragments are available, the
/// HeartbeatFrag Submessage is sent from an RTPS Writer to an RTPS Reader to
/// communicate which fragments the Writer has available.
///
/// Once all fragments are available, a regular Heartbeat message is used.
#[derive(Debug, PartialEq, Eq, Clone, Readable, Writable)]
pub struct HeartbeatFrag {
  pub reader_id: EntityId,
  pub writer_id: EntityId,
  pub writer_sn: SequenceNumber,
  /// All fragments up to and including this one are available.
  pub last_fragment_num: FragmentNumber,
  pub count: Count,
}

impl HeartbeatFrag {
  pub fn is_valid(&self) -> bool {
    self.writer_sn.is_valid() && u32::from(self.last_fragment_num) >= 1
  }

  pub fn create_submessage(self, flags: BitFlags<HEARTBEATFRAG_Flags>) -> Option<Submessage> {
    let content_length = match self.write_to_vec_with_ctx(endianness_flag(flags.bits())) {
      Ok(bytes) => bytes.len() as u16,
      Err(e) => {
        error!("Writer couldn't write heartbeat_frag to bytes. Error: {}", e);
        return None;
      }
    };
    Some(Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::HEARTBEAT_FRAG,
        flags: flags.bits(),
        content_length,
      },
      body: SubmessageBody::Writer(WriterSubmessage::HeartbeatFrag(self, flags)),
    })
  }
}
