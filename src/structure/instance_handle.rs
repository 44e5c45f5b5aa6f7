use std::fmt;

use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

use super::guid::GUID;

/// Identity of a data instance, i.e. the RTPS KeyHash (RTPS spec 9.6.3.8).
///
/// Keys whose serialized form fits into 16 bytes are used as such, zero
/// padded. Longer keys are hashed with MD5.
#[derive(
  Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Readable, Writable, Serialize,
  Deserialize,
)]
pub struct InstanceHandle([u8; 16]);

impl InstanceHandle {
  pub const NIL: Self = Self([0; 16]);

  pub const fn new(bytes: [u8; 16]) -> Self {
    Self(bytes)
  }

  pub fn from_serialized_key(key: &[u8]) -> Self {
    if key.len() <= 16 {
      let mut bytes = [0; 16];
      bytes[..key.len()].copy_from_slice(key);
      Self(bytes)
    } else {
      Self(md5::compute(key).0)
    }
  }

  pub fn from_slice(slice: &[u8]) -> Option<Self> {
    if slice.len() < 16 {
      return None;
    }
    let mut bytes = [0; 16];
    bytes.copy_from_slice(&slice[..16]);
    Some(Self(bytes))
  }

  pub fn is_nil(&self) -> bool {
    *self == Self::NIL
  }

  pub fn to_bytes(self) -> [u8; 16] {
    self.0
  }
}

impl From<GUID> for InstanceHandle {
  fn from(guid: GUID) -> Self {
    Self(guid.to_bytes())
  }
}

impl fmt::Debug for InstanceHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "InstanceHandle(")?;
    for b in &self.0 {
      write!(f, "{:02x}", b)?;
    }
    write!(f, ")")
  }
}
