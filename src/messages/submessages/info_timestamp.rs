use enumflags2::BitFlags;

use crate::{
  messages::submessages::{
    submessage::InterpreterSubmessage, submessage_flag::INFOTIMESTAMP_Flags,
    submessage_header::SubmessageHeader, submessage_kind::SubmessageKind,
  },
  rtps::{Submessage, SubmessageBody},
  structure::time::Timestamp,
};

/// Sets the source timestamp for the Submessages that follow. `None`
/// (invalidate flag set) means the following Submessages have no timestamp.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InfoTimestamp {
  pub timestamp: Option<Timestamp>,
}

impl InfoTimestamp {
  pub fn create_submessage(self, flags: BitFlags<INFOTIMESTAMP_Flags>) -> Submessage {
    let flags = if self.timestamp.is_some() {
      flags & !INFOTIMESTAMP_Flags::Invalidate
    } else {
      flags | INFOTIMESTAMP_Flags::Invalidate
    };
    Submessage {
      header: SubmessageHeader {
        kind: SubmessageKind::INFO_TS,
        flags: flags.bits(),
        content_length: if self.timestamp.is_some() { 8 } else { 0 },
      },
      body: SubmessageBody::Interpreter(InterpreterSubmessage::InfoTimestamp(self, flags)),
    }
  }
}
