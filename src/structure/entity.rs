use crate::structure::guid::{EntityId, GuidPrefix, GUID};

/// RTPS Entity: anything visible to other RTPS entities on the network, and
/// thus carrying a globally unique GUID. Writers, readers and the participant
/// implement this. RTPS 2.3 specification section 8.2.4
pub trait RTPSEntity {
  fn guid(&self) -> GUID;

  fn entity_id(&self) -> EntityId {
    self.guid().entity_id
  }

  fn guid_prefix(&self) -> GuidPrefix {
    self.guid().prefix
  }
}
