//! An RTPS reliability and discovery engine.
//!
//! The core is [`RtpsParticipant`], which owns stateful and stateless
//! writers and readers, answers heartbeats and acknowledgements, and runs
//! SPDP and SEDP to find and match remote endpoints. It does no I/O of its
//! own: datagrams go out through a [`Transport`](network::Transport),
//! received ones are fed to it, and timers are run against a
//! [`Clock`](rtps::timed_event::Clock). This makes the whole protocol
//! testable on a [`SimulatedNetwork`](network::simulated::SimulatedNetwork).
//!
//! [`DomainParticipant`] runs a participant in its own thread over UDP.
//!
//! # Example
//!
//! ```no_run
//! use rtps_core::{
//!   dds::serialization::SpeedyCdr,
//!   policy::{Durability, Reliability},
//!   DomainParticipant, QosPolicyBuilder,
//! };
//! use speedy::{Readable, Writable};
//!
//! #[derive(Readable, Writable)]
//! struct Temperature {
//!   celsius: f32,
//! }
//!
//! let participant = DomainParticipant::new(0).unwrap();
//! let qos = QosPolicyBuilder::new()
//!   .reliability(Reliability::Reliable {
//!     max_blocking_time: rtps_core::Duration::from_millis(100),
//!   })
//!   .durability(Durability::TransientLocal)
//!   .build();
//! let writer = participant
//!   .create_writer("Temperature", "Temperature", &qos, false)
//!   .unwrap();
//! participant
//!   .write::<_, SpeedyCdr<Temperature>>(&writer, Temperature { celsius: 21.5 }, None)
//!   .unwrap_or_else(|e| panic!("{}", e));
//! ```

#[macro_use]
mod checked_impl;
#[cfg(test)]
#[macro_use]
mod test;

pub mod dds;
pub mod discovery;
pub mod history;
pub mod messages;
pub mod network;
pub mod rtps;
pub mod structure;

pub use dds::{
  participant::{DomainParticipant, ReaderHandle, WriterHandle},
  qos::{policy, QosPolicies, QosPolicyBuilder},
  result::{Error, Result, WriteError, WriteResult},
  serialization::{Keyed, Sample, TypeSupport},
};
pub use rtps::participant::{ParticipantConfig, RtpsParticipant};
pub use structure::{
  duration::Duration,
  guid::{EntityId, GuidPrefix, GUID},
  sequence_number::SequenceNumber,
  time::Timestamp,
};
