#[macro_use]
pub(crate) mod serialization_test;
