use speedy::{Readable, Writable};

use crate::{
  messages::{protocol_version::ProtocolVersion, vendor_id::VendorId},
  structure::guid::GuidPrefix,
};

/// Modifies the logical source of the Submessages that follow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Readable, Writable)]
pub struct InfoSource {
  /// RTPS 2.5 specifies an unused long here in 9.4.5.11
  pub unused: u32,
  pub protocol_version: ProtocolVersion,
  pub vendor_id: VendorId,
  pub guid_prefix: GuidPrefix,
}
