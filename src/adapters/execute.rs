//! External Command Execution
//!
//! One shared helper for every adapter that shells out. Non-zero exit
//! statuses are mapped to [`Error::CommandFailed`] carrying the full command
//! line, the status, and stderr verbatim, so that failures from `zpool`,
//! `zfs`, `tar`, or `systemctl` reach the operator unmodified.

use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Render a command as `program arg1 arg2 ...` for logs and errors.
pub fn command_to_string(command: &Command) -> String {
    let inner = command.as_std();
    std::iter::once(inner.get_program())
        .chain(inner.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join(" ")
}

/// Run a command to completion and check its exit status.
pub async fn execute(command: &mut Command) -> Result<Output> {
    let rendered = command_to_string(command);
    debug!(command = %rendered, "executing");

    let output = command.output().await.map_err(|source| Error::SpawnFailed {
        program: rendered.clone(),
        source,
    })?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            program: rendered,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Run a command and return its stdout as a string.
pub async fn execute_stdout(command: &mut Command) -> Result<String> {
    let output = execute(command).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
