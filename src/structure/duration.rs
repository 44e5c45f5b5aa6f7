use std::{convert::From, fmt, time::Duration as StdDuration};

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// RTPS spec 9.3.2 Duration_t: seconds and 2^-32 fractions of a second.
#[derive(
  PartialEq, Eq, Hash, PartialOrd, Ord, Readable, Writable, Serialize, Deserialize, Copy, Clone,
)]
pub struct Duration {
  seconds: i32,
  fraction: u32,
}

impl Duration {
  pub const DURATION_ZERO: Self = Self {
    seconds: 0,
    fraction: 0,
  };
  pub const DURATION_INFINITE: Self = Self {
    seconds: 0x7FFF_FFFF,
    fraction: 0xFFFF_FFFF,
  };

  pub const fn from_secs(secs: i32) -> Self {
    Self {
      seconds: secs,
      fraction: 0,
    }
  }

  pub fn from_millis(millis: i64) -> Self {
    Self::from(StdDuration::from_millis(millis.max(0) as u64))
  }

  pub fn is_infinite(&self) -> bool {
    *self == Self::DURATION_INFINITE
  }

  pub fn to_nanoseconds(&self) -> i64 {
    i64::from(self.seconds) * 1_000_000_000
      + ((i64::from(self.fraction) * 1_000_000_000) >> 32)
  }

  /// `None` for infinite durations.
  pub fn to_std(&self) -> Option<StdDuration> {
    if self.is_infinite() || self.seconds < 0 {
      None
    } else {
      Some(StdDuration::from(*self))
    }
  }
}

impl From<StdDuration> for Duration {
  fn from(duration: StdDuration) -> Self {
    let secs = duration.as_secs();
    if secs >= 0x7FFF_FFFF {
      return Self::DURATION_INFINITE;
    }
    Self {
      seconds: secs as i32,
      fraction: ((u64::from(duration.subsec_nanos()) << 32) / 1_000_000_000) as u32,
    }
  }
}

impl From<Duration> for StdDuration {
  fn from(d: Duration) -> Self {
    if d.seconds < 0 {
      return StdDuration::from_secs(0);
    }
    StdDuration::new(
      d.seconds as u64,
      ((u64::from(d.fraction) * 1_000_000_000) >> 32) as u32,
    )
  }
}

impl fmt::Debug for Duration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_infinite() {
      f.write_str("Duration::INFINITE")
    } else {
      write!(f, "{:?}", StdDuration::from(*self))
    }
  }
}
