//! Shell command executor
//!
//! Runs one command on the device through a single OPEN/OKAY/CLOSE stream
//! cycle. The executor does not interpret the command; a key event is just
//! an `input keyevent <code>` string.

use thiserror::Error;

use super::{Session, TransportError};
use crate::protocol::{command_label, Command};

/// Errors raised while running a shell command
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Service open rejected: peer answered {command}")]
    Rejected { command: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type ExecResult<T> = Result<T, ExecError>;

/// Service name for a shell command, e.g. `shell:input keyevent 19`
pub fn shell_service(command: &str) -> String {
    format!("shell:{}", command)
}

/// Shell command that injects a single key event
pub fn keyevent_command(code: u32) -> String {
    format!("input keyevent {}", code)
}

/// Run `command` on the device.
///
/// Opens a shell stream, waits for the OKAY, drains exactly one more packet
/// (the command's output or the peer's CLOSE) and then closes the stream
/// from our side. The CLOSE is not acknowledged: the stream is considered
/// closed as soon as it has been written.
///
/// Only one packet is drained after the OKAY. A device that sends its output
/// and then its own CLOSE leaves that CLOSE unread, and the next command on
/// the same session reads it as its reply and fails as rejected.
pub async fn run_shell_command(session: &mut Session, command: &str) -> ExecResult<()> {
    let local_id = session.local_stream_id();

    let mut service = shell_service(command).into_bytes();
    service.push(0);
    session.send_raw(Command::Open, local_id, 0, &service).await?;

    let reply = session.recv_raw().await?.ok_or(TransportError::Closed)?;
    if !reply.is(Command::Okay) {
        tracing::warn!(
            "Device refused '{}': got {}",
            command,
            command_label(reply.command)
        );
        return Err(ExecError::Rejected {
            command: command_label(reply.command),
        });
    }

    let remote_id = reply.arg0;
    session.set_remote_stream_id(remote_id);
    tracing::debug!("Stream {} -> {} open for '{}'", local_id, remote_id, command);

    // WRTE with output or CLSE; either way the command has run
    let completion = session.recv_raw().await?.ok_or(TransportError::Closed)?;
    tracing::trace!(
        "Stream {} completion: {} '{}'",
        remote_id,
        completion,
        completion.payload_text()
    );

    session
        .send_raw(Command::Close, local_id, remote_id, &[])
        .await?;
    session.set_remote_stream_id(0);

    tracing::debug!("Stream {} -> {} closed", local_id, remote_id);
    Ok(())
}
