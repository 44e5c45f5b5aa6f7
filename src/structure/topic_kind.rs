use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

use crate::structure::guid::EntityKind;

/// Whether the data type of a topic has a key. RTPS spec 8.2.1.2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Readable, Writable, Serialize, Deserialize)]
pub struct TopicKind {
  value: u32,
}

impl TopicKind {
  pub const NO_KEY: Self = Self { value: 1 };
  pub const WITH_KEY: Self = Self { value: 2 };

  pub fn of_entity_kind(kind: EntityKind) -> Self {
    if kind.is_with_key() {
      Self::WITH_KEY
    } else {
      Self::NO_KEY
    }
  }
}
