use std::{io, result};

use thiserror::Error as ThisError;

/// This is a specialized Result, similar to std::io::Result
pub type Result<T> = result::Result<T, Error>;

/// This roughly corresponds to "Return codes" in DDS spec 2.2.1.1 Format and
/// Conventions
///
/// Deviations from the DDS spec:
/// * `OK` is not included. Ok/Error is distinguished with the `Result` type.
/// * `Timeout` and `NoData` are normal operation and encoded as `Option`.
#[derive(Debug, ThisError)]
pub enum Error {
  /// Illegal parameter value.
  #[error("Bad parameter: {reason}")]
  BadParameter { reason: String },

  /// Service ran out of the resources needed to complete the operation.
  #[error("Out of resources")]
  OutOfResources,

  /// A pre-condition for the operation was not met.
  #[error("Precondition not met: {precondition}")]
  PreconditionNotMet { precondition: String },

  /// An operation was invoked on an inappropriate object or at
  /// an inappropriate time.
  #[error("Illegal operation: {reason}")]
  IllegalOperation { reason: String },

  /// Another thread exited while holding a lock.
  #[error("Lock poisoned")]
  LockPoisoned,

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("Serialization error: {reason}")]
  Serialization { reason: String },

  /// Something that should not go wrong went wrong anyway.
  #[error("Internal error: {reason}")]
  Internal { reason: String },
}

impl Error {
  pub fn bad_parameter<T>(reason: &str) -> Result<T> {
    Err(Self::BadParameter {
      reason: reason.to_string(),
    })
  }

  pub fn precondition_not_met<T>(precondition: &str) -> Result<T> {
    Err(Self::PreconditionNotMet {
      precondition: precondition.to_string(),
    })
  }

  pub fn illegal_operation<T>(reason: &str) -> Result<T> {
    Err(Self::IllegalOperation {
      reason: reason.to_string(),
    })
  }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_and_err_precondition_not_met {
  ($err_msg:literal) => {{
    log::error!($err_msg);
    $crate::dds::result::Error::precondition_not_met($err_msg)
  }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_and_err_internal {
  ($($arg:tt)*) => {{
    log::error!($($arg)*);
    Err($crate::dds::result::Error::Internal {
      reason: format!($($arg)*),
    })
  }};
}

impl<T> From<std::sync::PoisonError<T>> for Error {
  fn from(_e: std::sync::PoisonError<T>) -> Self {
    Self::LockPoisoned
  }
}

impl From<speedy::Error> for Error {
  fn from(e: speedy::Error) -> Self {
    Self::Serialization {
      reason: e.to_string(),
    }
  }
}

/// Failure of a write operation. The rejected data is handed back to the
/// caller where it is still available.
#[derive(Debug, ThisError)]
pub enum WriteError<D> {
  /// History is full and nothing could be evicted.
  #[error("Write would block")]
  WouldBlock { data: D },

  #[error("{reason}")]
  Serialization { reason: String, data: D },

  #[error("Poisoned: {reason}")]
  Poisoned { reason: String, data: D },

  #[error("{0}")]
  Dds(#[from] Error),
}

impl<D> WriteError<D> {
  /// Drops the carried data, keeping the error kind.
  pub fn forget_data(self) -> WriteError<()> {
    match self {
      Self::WouldBlock { .. } => WriteError::WouldBlock { data: () },
      Self::Serialization { reason, .. } => WriteError::Serialization { reason, data: () },
      Self::Poisoned { reason, .. } => WriteError::Poisoned { reason, data: () },
      Self::Dds(e) => WriteError::Dds(e),
    }
  }

  pub fn is_would_block(&self) -> bool {
    matches!(self, Self::WouldBlock { .. })
  }
}

pub type WriteResult<T, D> = result::Result<T, WriteError<D>>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn poison_maps_to_lock_poisoned() {
    let m = std::sync::Arc::new(std::sync::Mutex::new(0));
    let m2 = m.clone();
    let _ = std::thread::spawn(move || {
      let _guard = m2.lock().unwrap();
      panic!("poison it");
    })
    .join();
    let e: Error = m.lock().unwrap_err().into();
    assert!(matches!(e, Error::LockPoisoned));
  }

  #[test]
  fn write_error_keeps_data_until_forgotten() {
    let e: WriteError<Vec<u8>> = WriteError::WouldBlock { data: vec![1, 2] };
    assert!(e.is_would_block());
    match &e {
      WriteError::WouldBlock { data } => assert_eq!(data, &vec![1, 2]),
      _ => panic!("wrong variant"),
    }
    assert!(e.forget_data().is_would_block());
  }

  #[test]
  fn io_error_converts() {
    let e: Error = io::Error::new(io::ErrorKind::Other, "boom").into();
    assert!(e.to_string().contains("boom"));
  }
}
