use std::time::Duration;

use labvm_core::Backend;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("router connection: {0}")]
  Io(#[from] std::io::Error),

  #[error("router did not answer within {0:?}")]
  Timeout(Duration),

  #[error("router protocol error: {0}")]
  Protocol(String),

  /// The router rejected a command with `!trap`.
  #[error("{command}: {message}")]
  Trap { command: String, message: String },

  /// The router closed the session with `!fatal`.
  #[error("router closed the session: {0}")]
  Fatal(String),

  #[error("router login failed: {0}")]
  Login(String),

  /// The post-apply lookup found nothing under the natural key.
  #[error("{0} not present after apply")]
  Missing(String),
}

impl Error {
  /// Whether the session can no longer be trusted and must be reopened.
  pub(crate) fn breaks_session(&self) -> bool {
    matches!(
      self,
      Error::Io(_) | Error::Timeout(_) | Error::Protocol(_) | Error::Fatal(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for labvm_core::Error {
  fn from(e: Error) -> Self { labvm_core::Error::upstream(Backend::Router, e.to_string()) }
}
