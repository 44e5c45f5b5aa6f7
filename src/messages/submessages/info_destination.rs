use enumflags2::BitFlags;
use speedy::{Readable, Writable};

use crate::{
  messages::submessages::{
    submessage::InterpreterSubmessage, submessage_flag::INFODESTINATION_Flags,
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::guid::GuidPrefix,
};

/// The Submessages that follow are addressed to the participant with this
/// prefix. GuidPrefix::UNKNOWN means any participant.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Readable, Writable)]
pub struct InfoDestination {
  pub guid_prefix: GuidPrefix,
}

impl InfoDestination {
  pub fn create_submessage(self, flags: BitFlags<INFODESTINATION_Flags>) -> Submessage {
    Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_DST,
        flags: flags.bits(),
        content_length: 12,
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoDestination(self, flags)),
    }
  }
}
