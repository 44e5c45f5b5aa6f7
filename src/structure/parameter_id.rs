use std::fmt;

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// Parameter identifiers of RTPS spec Table 9.12 (and 9.13 for inline QoS).
#[derive(
  Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Readable, Writable, Serialize, Deserialize,
)]
pub struct ParameterId {
  value: u16,
}

impl ParameterId {
  pub const PID_PAD: Self = Self { value: 0x0000 };
  pub const PID_SENTINEL: Self = Self { value: 0x0001 };
  pub const PID_PARTICIPANT_LEASE_DURATION: Self = Self { value: 0x0002 };
  pub const PID_TOPIC_NAME: Self = Self { value: 0x0005 };
  pub const PID_OWNERSHIP_STRENGTH: Self = Self { value: 0x0006 };
  pub const PID_TYPE_NAME: Self = Self { value: 0x0007 };
  pub const PID_PROTOCOL_VERSION: Self = Self { value: 0x0015 };
  pub const PID_VENDOR_ID: Self = Self { value: 0x0016 };
  pub const PID_RELIABILITY: Self = Self { value: 0x001a };
  pub const PID_LIVELINESS: Self = Self { value: 0x001b };
  pub const PID_DURABILITY: Self = Self { value: 0x001d };
  pub const PID_OWNERSHIP: Self = Self { value: 0x001f };
  pub const PID_DEADLINE: Self = Self { value: 0x0023 };
  pub const PID_DESTINATION_ORDER: Self = Self { value: 0x0025 };
  pub const PID_LATENCY_BUDGET: Self = Self { value: 0x0027 };
  pub const PID_PARTITION: Self = Self { value: 0x0029 };
  pub const PID_USER_DATA: Self = Self { value: 0x002c };
  pub const PID_UNICAST_LOCATOR: Self = Self { value: 0x002f };
  pub const PID_MULTICAST_LOCATOR: Self = Self { value: 0x0030 };
  pub const PID_DEFAULT_UNICAST_LOCATOR: Self = Self { value: 0x0031 };
  pub const PID_METATRAFFIC_UNICAST_LOCATOR: Self = Self { value: 0x0032 };
  pub const PID_METATRAFFIC_MULTICAST_LOCATOR: Self = Self { value: 0x0033 };
  pub const PID_PARTICIPANT_MANUAL_LIVELINESS_COUNT: Self = Self { value: 0x0034 };
  pub const PID_HISTORY: Self = Self { value: 0x0040 };
  pub const PID_RESOURCE_LIMITS: Self = Self { value: 0x0041 };
  pub const PID_EXPECTS_INLINE_QOS: Self = Self { value: 0x0043 };
  pub const PID_DEFAULT_MULTICAST_LOCATOR: Self = Self { value: 0x0048 };
  pub const PID_PARTICIPANT_GUID: Self = Self { value: 0x0050 };
  pub const PID_GROUP_ENTITYID: Self = Self { value: 0x0053 };
  pub const PID_BUILTIN_ENDPOINT_SET: Self = Self { value: 0x0058 };
  pub const PID_ENDPOINT_GUID: Self = Self { value: 0x005a };
  pub const PID_ENTITY_NAME: Self = Self { value: 0x0062 };
  pub const PID_KEY_HASH: Self = Self { value: 0x0070 };
  pub const PID_STATUS_INFO: Self = Self { value: 0x0071 };

  /// Bit 15 marks vendor-specific parameters, bit 14 marks parameters that
  /// must be understood. RTPS spec 9.6.2.2.1
  pub fn is_vendor_specific(&self) -> bool {
    self.value & 0x8000 != 0
  }

  pub fn must_understand(&self) -> bool {
    self.value & 0x4000 != 0
  }
}

impl From<u16> for ParameterId {
  fn from(value: u16) -> Self {
    Self { value }
  }
}

impl From<ParameterId> for u16 {
  fn from(pid: ParameterId) -> Self {
    pid.value
  }
}

impl fmt::Debug for ParameterId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "PID({:#06x})", self.value)
  }
}
