//! Frees the game's well-known port before an online start.
//!
//! A previous game instance that did not shut down cleanly keeps the port bound
//! and makes the next launch fail. Everything here is best effort: failures are
//! logged and the launch goes ahead.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::net::is_port_in_use;

/// Terminate `executables` if something is listening on `port`.
///
/// Each kill command is waited on for at most `timeout`.
pub async fn free_port(port: u16, executables: &[String], timeout: Duration) {
    if !is_port_in_use(port) {
        return;
    }

    tracing::warn!(port, "Port is in use, terminating stale game processes");

    for executable in executables {
        let mut cmd = kill_command(executable);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.status()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%executable, code = ?status.code(), "Kill command finished");
            }
            Ok(Err(e)) => {
                tracing::warn!(%executable, "Could not run kill command: {}", e);
            }
            Err(_) => {
                tracing::warn!(%executable, ?timeout, "Kill command timed out");
            }
        }
    }

    if is_port_in_use(port) {
        tracing::warn!(port, "Port is still in use, launching anyway");
    }
}

#[cfg(target_os = "windows")]
fn kill_command(executable: &str) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/IM", executable]);
    cmd
}

#[cfg(not(target_os = "windows"))]
fn kill_command(executable: &str) -> Command {
    let mut cmd = Command::new("pkill");
    cmd.args(["-f", executable]);
    cmd
}
