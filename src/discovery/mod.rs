pub mod builtin_endpoint;
pub mod discovery;
pub(crate) mod discovery_db;
pub mod endpoint_proxy_data;
pub mod participant_message;
pub mod participant_proxy_data;
pub(crate) mod pl_cdr;

pub use discovery::Discovery;
