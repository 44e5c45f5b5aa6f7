pub mod cache_change;
pub mod count;
pub mod duration;
pub mod entity;
pub mod guid;
pub mod instance_handle;
pub mod locator;
pub mod parameter_id;
pub mod sequence_number;
pub mod time;
pub mod topic_kind;
