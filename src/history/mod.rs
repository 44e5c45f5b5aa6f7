pub mod change_pool;
pub mod reader_history;
pub mod writer_history;
