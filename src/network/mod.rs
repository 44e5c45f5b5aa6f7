pub mod constant;
pub mod simulated;
pub mod transport;
pub mod udp_listener;
pub mod udp_sender;
pub mod util;

pub use transport::Transport;
