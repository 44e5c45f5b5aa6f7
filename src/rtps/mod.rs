//! The RTPS behavior: stateful and stateless writers and readers, the
//! message receiver and the participant that ties them to discovery.

pub mod constant;
pub mod context;
pub(crate) mod dp_event_loop;
pub mod fragment_assembler;
pub mod message;
pub(crate) mod message_group;
pub(crate) mod message_receiver;
pub mod participant;
pub mod persistence;
pub mod reader;
pub mod reader_locator;
pub mod rtps_reader_proxy;
pub mod rtps_writer_proxy;
pub mod submessage;
pub mod timed_event;
pub mod writer;

pub use message::Message;
pub use submessage::{Submessage, SubmessageBody};
