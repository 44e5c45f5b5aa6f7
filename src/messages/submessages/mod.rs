pub mod ack_nack;
pub mod data;
pub mod data_frag;
pub mod gap;
pub mod heartbeat;
pub mod heartbeat_frag;
pub mod info_destination;
pub mod info_source;
pub mod info_timestamp;
pub mod nack_frag;
pub mod submessage;
pub mod submessage_elements;
pub mod submessage_flag;
pub mod submessage_header;
pub mod submessage_kind;

pub mod submessages {
  pub use super::{
    ack_nack::*, data::*, data_frag::*, gap::*, heartbeat::*, heartbeat_frag::*,
    info_destination::*, info_source::*, info_timestamp::*, nack_frag::*, submessage::*,
    submessage_header::*,
  };
}
