use speedy::{Readable, Writable};

/// Which builtin discovery endpoints a participant has. Carried in
/// PID_BUILTIN_ENDPOINT_SET of the SPDP data.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Readable, Writable)]
pub struct BuiltinEndpointSet {
  value: u32,
}

impl BuiltinEndpointSet {
  pub const PARTICIPANT_ANNOUNCER: u32 = 0x0000_0001;
  pub const PARTICIPANT_DETECTOR: u32 = 0x0000_0002;
  pub const PUBLICATIONS_ANNOUNCER: u32 = 0x0000_0004;
  pub const PUBLICATIONS_DETECTOR: u32 = 0x0000_0008;
  pub const SUBSCRIPTIONS_ANNOUNCER: u32 = 0x0000_0010;
  pub const SUBSCRIPTIONS_DETECTOR: u32 = 0x0000_0020;
  pub const PARTICIPANT_MESSAGE_DATA_WRITER: u32 = 0x0000_0400;
  pub const PARTICIPANT_MESSAGE_DATA_READER: u32 = 0x0000_0800;

  /// Everything this crate implements.
  pub const SIMPLE_DISCOVERY: u32 = Self::PARTICIPANT_ANNOUNCER
    | Self::PARTICIPANT_DETECTOR
    | Self::PUBLICATIONS_ANNOUNCER
    | Self::PUBLICATIONS_DETECTOR
    | Self::SUBSCRIPTIONS_ANNOUNCER
    | Self::SUBSCRIPTIONS_DETECTOR
    | Self::PARTICIPANT_MESSAGE_DATA_WRITER
    | Self::PARTICIPANT_MESSAGE_DATA_READER;

  pub fn from_u32(val: u32) -> Self {
    Self { value: val }
  }

  pub fn as_u32(self) -> u32 {
    self.value
  }

  pub fn contains(&self, other: u32) -> bool {
    (self.value & other) == other
  }
}

impl Default for BuiltinEndpointSet {
  fn default() -> Self {
    Self::from_u32(Self::SIMPLE_DISCOVERY)
  }
}
