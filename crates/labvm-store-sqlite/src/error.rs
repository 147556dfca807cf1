//! Error type for `labvm-store-sqlite`.

use labvm_core::Error as CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(tokio_rusqlite::Error),

  /// A CHECK, UNIQUE, or FOREIGN KEY constraint rejected the statement.
  #[error("constraint violated: {0}")]
  Constraint(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("no active session for {0}")]
  NoSession(String),

  #[error("{0} range exhausted")]
  Exhausted(&'static str),

  #[error("corrupt row: {0}")]
  Decode(String),
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match &e {
      tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, msg))
        if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
      {
        Error::Constraint(msg.clone().unwrap_or_else(|| failure.to_string()))
      }
      _ => Error::Database(e),
    }
  }
}

impl From<Error> for CoreError {
  fn from(e: Error) -> Self {
    match e {
      Error::Constraint(msg) => CoreError::Conflict(msg),
      Error::NotFound(what) => CoreError::NotFound(what),
      Error::NoSession(id) => CoreError::NoActiveSession(id),
      Error::Exhausted(what) => CoreError::CapacityExhausted(what),
      other => CoreError::Internal(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
