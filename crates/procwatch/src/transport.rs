//! Transports: how a command is run and how bytes move to and from it.
//!
//! Every transport exposes the same small interface so the session loop does
//! not care whether it is talking to a pipe, a pseudo-terminal or an SSH
//! channel. [`open`] picks the implementation from the command's
//! [`TransportKind`].

#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod pty;
#[cfg(unix)]
mod relay;
#[cfg(feature = "ssh")]
mod ssh;

use std::io;
use std::time::Duration;

use futures::future::BoxFuture;
pub use procwatch_pty::ExitStatus;

#[cfg(unix)]
pub use pipe::PipeTransport;
#[cfg(unix)]
pub use pty::PtyTransport;
#[cfg(feature = "ssh")]
pub use ssh::SshTransport;

use crate::command::CommandSpec;
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::types::TransportKind;

/// A running command's byte streams and lifecycle.
///
/// Implementations own every descriptor or channel they hold and release
/// them in [`close`](Self::close) or, as a last resort, on drop.
pub trait Transport: Send {
    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// The process group to signal on cancellation, for local transports.
    fn process_group(&self) -> Option<u32>;

    /// Read the next chunk of output into `buf`. `Ok(0)` is end-of-stream.
    ///
    /// Must be cancel-safe: dropping the future before it completes loses
    /// no output.
    fn read_chunk<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;

    /// Write all of `data` to the command's input.
    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Ask the command (its whole process group for local transports) to
    /// terminate.
    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Wait for the exit status. The status is captured once and cached;
    /// `None` when the remote side never reported one.
    fn wait_exit(&mut self) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>>;

    /// Release the transport. A command still running after `grace` is
    /// killed. Returns the exit status if known.
    fn close(&mut self, grace: Duration)
    -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>>;

    /// Output that was captured but kept out of the line loop (SSH stderr).
    fn take_error_output(&mut self) -> Vec<u8> {
        Vec::new()
    }
}

/// Start the transport `spec` asks for.
///
/// # Errors
///
/// Returns [`SessionError::Transport`] with the command line and cause if
/// the command cannot be started, or [`SessionError::Config`] if the
/// transport is not available in this build.
pub async fn open(
    spec: &CommandSpec,
    config: &SessionConfig,
) -> Result<Box<dyn Transport>, SessionError> {
    let command = spec.command_line();
    tracing::debug!(command, transport = %spec.transport(), "opening transport");

    match spec.transport() {
        #[cfg(unix)]
        TransportKind::LocalPipe => PipeTransport::spawn(spec)
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .map_err(|e| SessionError::transport(command, e)),
        #[cfg(unix)]
        TransportKind::LocalPty => PtyTransport::spawn(spec, config)
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .map_err(|e| SessionError::transport(command, e)),
        #[cfg(not(unix))]
        kind @ (TransportKind::LocalPipe | TransportKind::LocalPty) => {
            Err(crate::error::ConfigError::UnsupportedTransport {
                transport: kind.as_str(),
                reason: "local transports require a Unix platform",
            }
            .into())
        }
        #[cfg(feature = "ssh")]
        TransportKind::RemoteShell => SshTransport::connect(spec, config)
            .await
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .map_err(|e| SessionError::transport(command, e)),
        #[cfg(not(feature = "ssh"))]
        TransportKind::RemoteShell => Err(crate::error::ConfigError::UnsupportedTransport {
            transport: TransportKind::RemoteShell.as_str(),
            reason: "built without the `ssh` feature",
        }
        .into()),
    }
}

/// The argv to execute locally. A command line that does not split into a
/// program is reported as a spawn error.
#[cfg(unix)]
pub(crate) fn local_argv(spec: &CommandSpec) -> Result<Vec<String>, TransportError> {
    let argv = spec.argv().map_err(|e| {
        TransportError::spawn(spec.command_line(), io::Error::new(io::ErrorKind::InvalidInput, e))
    })?;
    if argv.is_empty() {
        return Err(TransportError::spawn(spec.command_line(), invalid_input()));
    }
    Ok(argv)
}

#[cfg(unix)]
pub(crate) fn invalid_input() -> io::Error {
    io::ErrorKind::InvalidInput.into()
}

/// Send `signal` to a process group, mapping the error into I/O terms.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, signal: procwatch_pty::PtySignal) -> io::Result<()> {
    procwatch_pty::signal_process_group(pgid, signal).map_err(io::Error::other)
}
