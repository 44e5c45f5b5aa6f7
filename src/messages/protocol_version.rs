use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

#[derive(
  Debug, PartialOrd, PartialEq, Ord, Eq, Hash, Readable, Writable, Serialize, Deserialize, Clone,
  Copy,
)]
pub struct ProtocolVersion {
  pub major: u8,
  pub minor: u8,
}

impl ProtocolVersion {
  pub const PROTOCOLVERSION: Self = Self::PROTOCOLVERSION_2_3;

  pub const PROTOCOLVERSION_1_0: Self = Self { major: 1, minor: 0 };
  pub const PROTOCOLVERSION_2_0: Self = Self { major: 2, minor: 0 };
  pub const PROTOCOLVERSION_2_1: Self = Self { major: 2, minor: 1 };
  pub const PROTOCOLVERSION_2_2: Self = Self { major: 2, minor: 2 };
  pub const PROTOCOLVERSION_2_3: Self = Self { major: 2, minor: 3 };
  pub const PROTOCOLVERSION_2_4: Self = Self { major: 2, minor: 4 };

  /// Messages with a different major version are ignored. RTPS spec 8.3.6.3
  pub fn is_compatible(&self) -> bool {
    self.major == Self::PROTOCOLVERSION.major
  }
}

impl Default for ProtocolVersion {
  fn default() -> Self {
    Self::PROTOCOLVERSION
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  serialization_test!( type = ProtocolVersion,
  {
      protocol_version,
      ProtocolVersion::PROTOCOLVERSION,
      le = [0x02, 0x03],
      be = [0x02, 0x03]
  },
  {
      protocol_version_2_4,
      ProtocolVersion::PROTOCOLVERSION_2_4,
      le = [0x02, 0x04],
      be = [0x02, 0x04]
  });

  #[test]
  fn major_version_compatibility() {
    assert!(ProtocolVersion::PROTOCOLVERSION_2_1.is_compatible());
    assert!(ProtocolVersion::PROTOCOLVERSION_2_4.is_compatible());
    assert!(!ProtocolVersion::PROTOCOLVERSION_1_0.is_compatible());
  }
}
