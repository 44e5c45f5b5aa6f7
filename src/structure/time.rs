use std::{convert::From, fmt};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// The representation of the time is the one defined by the IETF Network Time
/// Protocol (NTP) Standard (IETF RFC 1305). In this representation, time is
/// expressed in seconds and fraction of seconds using the formula:
/// time = seconds + (fraction / 2^(32))
///
/// This time representation is used in RTPS messages (INFO_TS). Internal
/// timing uses `std::time::Instant`.
#[derive(
  PartialEq, Eq, PartialOrd, Ord, Hash, Readable, Writable, Clone, Copy, Serialize, Deserialize,
)]
pub struct Timestamp {
  seconds: u32,
  fraction: u32,
}

impl Timestamp {
  pub const ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const INVALID: Self = Self {
    seconds: 0xFFFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };
  pub const INFINITE: Self = Self {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub fn now() -> Self {
    Self::from(Utc::now())
  }

  pub fn seconds(&self) -> u32 {
    self.seconds
  }

  pub fn fraction(&self) -> u32 {
    self.fraction
  }

  fn nanoseconds(&self) -> u32 {
    ((u64::from(self.fraction) * NANOS_PER_SEC) >> 32) as u32
  }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl From<DateTime<Utc>> for Timestamp {
  fn from(dt: DateTime<Utc>) -> Self {
    let nanos = u64::from(dt.timestamp_subsec_nanos());
    Self {
      seconds: dt.timestamp() as u32,
      fraction: ((nanos << 32) / NANOS_PER_SEC) as u32,
    }
  }
}

impl From<Timestamp> for DateTime<Utc> {
  fn from(ts: Timestamp) -> Self {
    Utc.timestamp(i64::from(ts.seconds), ts.nanoseconds())
  }
}

impl fmt::Debug for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::INVALID => f.write_str("Timestamp::INVALID"),
      Self::INFINITE => f.write_str("Timestamp::INFINITE"),
      _ => write!(f, "Timestamp({}.{:09})", self.seconds, self.nanoseconds()),
    }
  }
}
