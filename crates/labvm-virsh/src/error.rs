use std::time::Duration;

use labvm_core::Backend;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to run {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source:  std::io::Error,
  },

  /// The tool exited unsuccessfully. `message` is its trimmed stderr.
  #[error("{message}")]
  Command { program: String, message: String },

  #[error("{program} did not finish within {after:?}")]
  Timeout { program: String, after: Duration },

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source:  std::io::Error,
  },

  #[error("cannot hash password: {0}")]
  PasswordHash(String),
}

impl Error {
  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    Error::Io { context: context.into(), source }
  }

  /// Whether virsh answered that the named domain does not exist.
  pub(crate) fn is_missing_domain(&self) -> bool {
    matches!(self, Error::Command { message, .. }
      if message.contains("Domain not found") || message.contains("failed to get domain"))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for labvm_core::Error {
  fn from(e: Error) -> Self { labvm_core::Error::upstream(Backend::Hypervisor, e.to_string()) }
}
