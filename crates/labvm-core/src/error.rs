//! Error taxonomy shared by every layer.
//!
//! Backends keep their own error enums and convert into [`Error`]; the HTTP
//! layer maps [`Error::kind`] onto status codes.

use thiserror::Error;

/// The external system an [`Error::Upstream`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  Hypervisor,
  Router,
  Mail,
}

impl std::fmt::Display for Backend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Backend::Hypervisor => "hypervisor",
      Backend::Router => "router",
      Backend::Mail => "mail",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("{0}")]
  Conflict(String),

  #[error("{0} range exhausted")]
  CapacityExhausted(&'static str),

  #[error("no active session for {0}")]
  NoActiveSession(String),

  /// A hypervisor, router, or mail call failed. `message` is the backend's
  /// own (trimmed) diagnostic.
  #[error("{message}")]
  Upstream { backend: Backend, message: String },

  #[error("internal error: {0}")]
  Internal(String),
}

/// Coarse classification used for status-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  BadRequest,
  NotFound,
  Conflict,
  Upstream,
  Internal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::BadRequest(_) => ErrorKind::BadRequest,
      Error::NotFound(_) => ErrorKind::NotFound,
      Error::Conflict(_)
      | Error::CapacityExhausted(_)
      | Error::NoActiveSession(_) => ErrorKind::Conflict,
      Error::Upstream { .. } => ErrorKind::Upstream,
      Error::Internal(_) => ErrorKind::Internal,
    }
  }

  pub fn upstream(backend: Backend, message: impl Into<String>) -> Self {
    Error::Upstream { backend, message: message.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
