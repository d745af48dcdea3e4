//! LOCAL_PIPE: a child process with plain pipes.
//!
//! stdout and stderr are two descriptors for the same pipe, so the parent
//! reads one combined stream in the order the child wrote it.

use std::io;
use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use procwatch_pty::{ExitStatus, PtySignal};
use rustix::io::{FdFlags, fcntl_setfd};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin, Command};

use super::{Transport, invalid_input, local_argv, signal_group};
use crate::command::CommandSpec;
use crate::error::TransportError;
use crate::types::TransportKind;

/// A child process in its own process group, output read from one pipe.
#[derive(Debug)]
pub struct PipeTransport {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    output: pipe::Receiver,
    exit_status: Option<ExitStatus>,
}

impl PipeTransport {
    /// Spawn the command. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the pipe cannot be created or the program cannot be
    /// executed.
    pub fn spawn(spec: &CommandSpec) -> Result<Self, TransportError> {
        let argv = local_argv(spec)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TransportError::spawn(spec.command_line(), invalid_input()))?;

        let (read_end, write_end) = output_pipe()?;
        let stderr_end = write_end.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .process_group(0);
        if !spec.inherit_env() {
            command.env_clear();
        }
        command.envs(spec.env());
        if let Some(dir) = spec.working_directory() {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TransportError::spawn(program.clone(), e))?;
        // The command still holds the parent's copies of the write ends.
        drop(command);

        let pid = child.id().ok_or_else(|| {
            let reason = io::Error::other("child exited before its pid was read");
            TransportError::spawn(program.clone(), reason)
        })?;
        let stdin = child.stdin.take();
        let output = pipe::Receiver::from_owned_fd(read_end)?;

        tracing::debug!(program = %program, pid, "spawned pipe child");

        Ok(Self {
            child,
            pid,
            stdin,
            output,
            exit_status: None,
        })
    }

    /// The child's process id, which is also its process group id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    async fn reap(&mut self) -> Result<ExitStatus, TransportError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = ExitStatus::from_std(self.child.wait().await?);
        self.exit_status = Some(status);
        Ok(status)
    }

    fn is_running(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(ExitStatus::from_std(status));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

fn output_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) = rustix::pipe::pipe()?;
    fcntl_setfd(&read_end, FdFlags::CLOEXEC)?;
    fcntl_setfd(&write_end, FdFlags::CLOEXEC)?;
    Ok((read_end, write_end))
}

impl Transport for PipeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalPipe
    }

    fn process_group(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn read_chunk<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(self.output.read(buf))
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let stdin = self
                .stdin
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
            stdin.write_all(data).await?;
            stdin.flush().await
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move { signal_group(self.pid, PtySignal::Terminate) })
    }

    fn wait_exit(&mut self) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move { self.reap().await.map(Some) })
    }

    fn close(
        &mut self,
        grace: Duration,
    ) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            self.stdin = None;
            if self.exit_status.is_none() {
                match tokio::time::timeout(grace, self.child.wait()).await {
                    Ok(status) => self.exit_status = Some(ExitStatus::from_std(status?)),
                    Err(_) => {
                        tracing::info!(
                            pgid = self.pid,
                            ?grace,
                            "child still running after grace period, killing group"
                        );
                        signal_group(self.pid, PtySignal::Kill)?;
                    }
                }
            }
            self.reap().await.map(Some)
        })
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::debug!(pgid = self.pid, "dropping live pipe transport, killing group");
            let _ = signal_group(self.pid, PtySignal::Kill);
        }
    }
}
