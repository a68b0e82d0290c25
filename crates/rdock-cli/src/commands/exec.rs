//! Exec command implementation

use anyhow::{Context, Result};
use std::io::Write;

use rdock_core::error::RemoteError;
use rdock_core::ConnectionKey;

use crate::runtime::Runtime;

/// Run a command on a remote host and copy its output to stdout.
///
/// Returns the remote exit status, `None` when the command could not be run.
pub async fn exec_command(
    runtime: &Runtime,
    target: &str,
    command: &[String],
) -> Result<Option<i32>> {
    let key = ConnectionKey::parse(target).with_context(|| format!("Invalid target: {}", target))?;
    let command = command.join(" ");

    match runtime.executor().execute(&key, &command).await {
        Ok(output) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(&output)?;
            stdout.flush()?;
            Ok(Some(0))
        }
        Err(RemoteError::Exit { status, output }) => {
            let mut stdout = std::io::stdout();
            stdout.write_all(output.as_bytes())?;
            stdout.flush()?;
            Ok(status)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to run command on {}", key)),
    }
}
