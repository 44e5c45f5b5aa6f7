use std::{fmt, ops::Add};

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

/// Count_t of HEARTBEAT and ACKNACK submessages. Each sender increments its
/// own counter so that receivers can drop duplicates and stale messages.
#[derive(
  Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct Count(i32);

impl Count {
  pub const ZERO: Self = Self(0);

  pub const fn new(value: i32) -> Self {
    Self(value)
  }

  /// Wraps around instead of overflowing.
  #[must_use]
  pub fn next(self) -> Self {
    Self(self.0.wrapping_add(1))
  }

  pub fn value(self) -> i32 {
    self.0
  }
}

impl Add<i32> for Count {
  type Output = Self;
  fn add(self, rhs: i32) -> Self {
    Self(self.0.wrapping_add(rhs))
  }
}

impl From<i32> for Count {
  fn from(value: i32) -> Self {
    Self(value)
  }
}

impl fmt::Debug for Count {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Count({})", self.0)
  }
}
