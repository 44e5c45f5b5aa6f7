use speedy::{Readable, Writable};

use crate::{
  messages::{protocol_id::ProtocolId, protocol_version::ProtocolVersion, vendor_id::VendorId},
  structure::guid::GuidPrefix,
};

/// RTPS message header, 20 bytes. RTPS spec 9.4.4
#[derive(Debug, Clone, Copy, Readable, Writable, PartialEq, Eq)]
pub struct Header {
  pub protocol_id: ProtocolId,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}

impl Header {
  pub const LENGTH: usize = 20;

  pub fn new(guid_prefix: GuidPrefix) -> Self {
    Self {
      protocol_id: ProtocolId::PROTOCOL_RTPS,
      protocol_version: ProtocolVersion::PROTOCOLVERSION,
      vendor_id: VendorId::THIS_IMPLEMENTATION,
      guid_prefix,
    }
  }

  pub fn is_valid(&self) -> bool {
    self.protocol_id.is_valid() && self.protocol_version.is_compatible()
  }
}
