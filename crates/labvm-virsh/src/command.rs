//! Subprocess execution with stderr capture and an optional deadline.

use std::{ffi::OsStr, fmt::Debug, process::Output, time::Duration};

use tokio::process::Command;

use crate::{Error, Result};

/// Strip the `error:` / `ERROR:` prefixes libvirt and QEMU tools put on every
/// diagnostic line and fold the remaining lines into one message.
pub fn trim_stderr(stderr: &str) -> String {
  stderr
    .lines()
    .map(str::trim)
    .map(|line| {
      line
        .strip_prefix("error:")
        .or_else(|| line.strip_prefix("ERROR:"))
        .unwrap_or(line)
        .trim()
    })
    .filter(|line| !line.is_empty())
    .collect::<Vec<_>>()
    .join("; ")
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Runner {
  pub timeout: Option<Duration>,
}

impl Runner {
  /// Run `program` to completion and return its stdout.
  pub async fn run<A>(&self, program: &str, args: &[A]) -> Result<String>
  where
    A: AsRef<OsStr> + Debug,
  {
    tracing::debug!(program, ?args, "running");

    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    let output = match self.timeout {
      Some(after) => tokio::time::timeout(after, command.output())
        .await
        .map_err(|_| Error::Timeout { program: program.to_owned(), after })?,
      None => command.output().await,
    }
    .map_err(|source| Error::Spawn { program: program.to_owned(), source })?;

    check(program, output)
  }

  /// Like [`run`](Self::run), but a failure is only logged.
  pub async fn run_ignoring<A>(&self, program: &str, args: &[A])
  where
    A: AsRef<OsStr> + Debug,
  {
    if let Err(e) = self.run(program, args).await {
      tracing::debug!(program, ?args, error = %e, "ignored failure");
    }
  }
}

fn check(program: &str, output: Output) -> Result<String> {
  if output.status.success() {
    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
  }

  let mut message = trim_stderr(&String::from_utf8_lossy(&output.stderr));
  if message.is_empty() {
    message = format!("{program} exited with {}", output.status);
  }
  Err(Error::Command { program: program.to_owned(), message })
}
