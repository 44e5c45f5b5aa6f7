pub mod participant;
/// DDS Quality of Service
pub mod qos;
pub mod result;
pub mod serialization;
pub mod statusevents;

/// DDS Error
pub mod error {
  pub use super::result::*;
}

pub use participant::{DomainParticipant, ReaderHandle, WriterHandle};
