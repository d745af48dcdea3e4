//! LOCAL_PTY: a child on a pseudo-terminal.
//!
//! The child sees a terminal, so programs that buffer or change behaviour
//! when piped (password prompts, pagers, progress bars) run as they would
//! interactively. While the session reads, the caller's keystrokes are
//! relayed into the terminal and window size changes are forwarded.

use std::future::{self, Future};
use std::io::{self, IsTerminal};
use std::time::Duration;

use futures::future::BoxFuture;
use procwatch_pty::{
    ExitStatus, PtyConfig, PtySignal, UnixPtyChild, UnixPtyMaster, WindowSize, WindowWatcher,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{Transport, invalid_input, local_argv};
use super::relay::StdinRelay;
use crate::command::CommandSpec;
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::types::TransportKind;

/// A child process attached to a pseudo-terminal.
#[derive(Debug)]
pub struct PtyTransport {
    master: UnixPtyMaster,
    child: UnixPtyChild,
    relay: Option<StdinRelay>,
    resize_rx: Option<mpsc::UnboundedReceiver<()>>,
    watcher: Option<WindowWatcher>,
}

impl PtyTransport {
    /// Spawn the command on a fresh PTY. Must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Fails if the PTY cannot be allocated or the program cannot be
    /// executed.
    pub fn spawn(spec: &CommandSpec, config: &SessionConfig) -> Result<Self, TransportError> {
        let argv = local_argv(spec)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| TransportError::spawn(spec.command_line(), invalid_input()))?;

        let (cols, rows) = config.window_size;
        let mut builder = PtyConfig::builder().window_size(cols, rows);
        if !spec.inherit_env() {
            builder = builder.clean_env();
        }
        builder = builder.env("TERM", &config.term).envs(spec.env());
        if let Some(dir) = spec.working_directory() {
            builder = builder.working_directory(dir);
        }
        let pty_config = builder.build();

        let (master, child) = procwatch_pty::spawn(program, args, &pty_config)?;
        tracing::debug!(program = %program, pid = child.pid(), cols, rows, "spawned pty child");

        let relay = if config.relay_stdin {
            match StdinRelay::start(config.raw_mode) {
                Ok(relay) => Some(relay),
                Err(err) => {
                    tracing::warn!(error = %err, "stdin relay unavailable, continuing without it");
                    None
                }
            }
        } else {
            None
        };

        let (resize_rx, watcher) = if io::stdout().is_terminal() {
            start_window_watcher()
        } else {
            (None, None)
        };

        Ok(Self {
            master,
            child,
            relay,
            resize_rx,
            watcher,
        })
    }

    /// The child's process id, which is also its process group id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.child.pid()
    }

    /// Resize the terminal.
    ///
    /// # Errors
    ///
    /// Fails if the PTY is closed or the ioctl fails.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError> {
        self.master.set_window_size(WindowSize::new(cols, rows))?;
        Ok(())
    }

    fn follow_terminal_size(&self) {
        match crossterm::terminal::size() {
            Ok((cols, rows)) => {
                if let Err(err) = self.resize(cols, rows) {
                    tracing::debug!(error = %err, "failed to forward window size");
                } else {
                    tracing::trace!(cols, rows, "forwarded window size");
                }
            }
            Err(err) => tracing::debug!(error = %err, "failed to query terminal size"),
        }
    }

    fn stop_helpers(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            relay.stop();
        }
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.resize_rx = None;
    }
}

fn start_window_watcher() -> (Option<mpsc::UnboundedReceiver<()>>, Option<WindowWatcher>) {
    let (tx, rx) = mpsc::unbounded_channel();
    match WindowWatcher::start(move || {
        let _ = tx.send(());
    }) {
        Ok(watcher) => (Some(rx), Some(watcher)),
        Err(err) => {
            tracing::debug!(error = %err, "window size watcher unavailable");
            (None, None)
        }
    }
}

/// Receive from an optional channel; pending forever when there is none.
fn recv_from<T: Send>(
    rx: Option<&mut mpsc::UnboundedReceiver<T>>,
) -> impl Future<Output = Option<T>> + Send + '_ {
    async move {
        match rx {
            Some(rx) => rx.recv().await,
            None => future::pending().await,
        }
    }
}

impl Transport for PtyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LocalPty
    }

    fn process_group(&self) -> Option<u32> {
        Some(self.child.pid())
    }

    fn read_chunk<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            loop {
                let relay_rx = self.relay.as_mut().map(|relay| &mut relay.rx);
                tokio::select! {
                    biased;
                    input = recv_from(relay_rx) => match input {
                        Some(bytes) => self.master.write_all(&bytes).await?,
                        None => {
                            tracing::debug!("stdin closed, stopping relay");
                            self.relay = None;
                        }
                    },
                    Some(()) = recv_from(self.resize_rx.as_mut()) => self.follow_terminal_size(),
                    read = self.master.read(&mut *buf) => return read,
                }
            }
        })
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.master.write_all(data).await?;
            self.master.flush().await
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.child
                .signal_group(PtySignal::Terminate)
                .map_err(io::Error::other)
        })
    }

    fn wait_exit(&mut self) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move { Ok(Some(self.child.wait().await?)) })
    }

    fn close(
        &mut self,
        grace: Duration,
    ) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            self.stop_helpers();
            let status = match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    tracing::info!(
                        pgid = self.child.pid(),
                        ?grace,
                        "child still running after grace period, killing group"
                    );
                    self.child.signal_group(PtySignal::Kill)?;
                    self.child.wait().await?
                }
            };
            self.master.close();
            Ok(Some(status))
        })
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.stop_helpers();
        if matches!(self.child.try_wait(), Ok(None)) {
            tracing::debug!(pgid = self.child.pid(), "dropping live pty transport, killing group");
            let _ = self.child.signal_group(PtySignal::Kill);
        }
    }
}
