//! REMOTE_SHELL: a command run over an SSH exec channel.
//!
//! The channel's stdout feeds the line loop. Its stderr stream is collected
//! separately and handed to the session when the loop ends, so remote
//! diagnostics never trigger rules.

mod auth;
mod host_key;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use procwatch_pty::ExitStatus;
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg, Disconnect, Sig};

use super::Transport;
use crate::command::CommandSpec;
use crate::config::SessionConfig;
use crate::error::{ConfigError, SshError, TransportError};
use crate::remote::{HostKeyPolicy, SshTarget};
use crate::types::TransportKind;

/// Extended data stream number for stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// russh client callbacks: host key verification.
pub(crate) struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: PathBuf,
    rejection: Arc<Mutex<Option<String>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match host_key::verify(
            &self.policy,
            &self.known_hosts,
            &self.host,
            self.port,
            server_public_key,
        ) {
            Ok(()) => Ok(true),
            Err(reason) => {
                tracing::warn!(
                    host = %self.host,
                    port = self.port,
                    %reason,
                    "rejecting server host key"
                );
                *self.rejection.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
                Ok(false)
            }
        }
    }
}

/// A command running on a remote host over SSH.
pub struct SshTransport {
    target: SshTarget,
    handle: Handle<ClientHandler>,
    channel: Channel<Msg>,
    pending: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<ExitStatus>,
    closed: bool,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("target", &self.target)
            .field("pending", &self.pending.len())
            .field("stderr", &self.stderr.len())
            .field("exit_status", &self.exit_status)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SshTransport {
    /// Connect, authenticate and start the command.
    ///
    /// # Errors
    ///
    /// Fails on connection timeout, a rejected host key, exhausted
    /// authentication methods, or if the exec request is refused.
    pub async fn connect(
        spec: &CommandSpec,
        config: &SessionConfig,
    ) -> Result<Self, TransportError> {
        let target = spec
            .remote()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, ConfigError::MissingRemoteTarget)
            })?
            .clone();
        let host = target.host().to_string();
        let port = target.port_number();

        let rejection = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            host: host.clone(),
            port,
            policy: target.host_key().clone(),
            known_hosts: target.known_hosts_path(),
            rejection: Arc::clone(&rejection),
        };

        tracing::info!(%host, port, user = target.user_name(), "connecting to SSH server");
        let connected = tokio::time::timeout(
            config.connect_timeout,
            client::connect(Arc::new(client::Config::default()), (host.as_str(), port), handler),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout { limit: config.connect_timeout })?;

        let mut handle = match connected {
            Ok(handle) => handle,
            Err(err) => {
                let rejected = rejection.lock().unwrap_or_else(PoisonError::into_inner).take();
                return Err(match rejected {
                    Some(reason) => SshError::host_key_rejected(&host, reason),
                    None => SshError::connection(&host, port, err.to_string()),
                }
                .into());
            }
        };

        auth::authenticate(&mut handle, target.user_name(), &target.auth_methods()).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::channel(format!("failed to open session channel: {e}")))?;
        let command = spec.remote_command();
        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| SshError::channel(format!("exec request failed: {e}")))?;

        tracing::debug!(%target, command = %command, "remote command started");

        Ok(Self {
            target,
            handle,
            channel,
            pending: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
            closed: false,
        })
    }

    /// The remote target.
    #[must_use]
    pub const fn target(&self) -> &SshTarget {
        &self.target
    }

    /// Apply one channel message. Returns stdout data, if any.
    fn absorb(&mut self, msg: ChannelMsg) -> Option<Vec<u8>> {
        match msg {
            ChannelMsg::Data { data } => return Some(data.to_vec()),
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                self.stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus { exit_status } => {
                if self.exit_status.is_none() {
                    let code = i32::try_from(exit_status).unwrap_or(i32::MAX);
                    tracing::debug!(code, "remote command exited");
                    self.exit_status = Some(ExitStatus::Exited(code));
                }
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                if self.exit_status.is_none() {
                    tracing::debug!(signal = ?signal_name, "remote command killed by signal");
                    self.exit_status = Some(ExitStatus::Signaled(signal_number(&signal_name)));
                }
            }
            ChannelMsg::Eof | ChannelMsg::Close => self.closed = true,
            _ => {}
        }
        None
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

/// Signal numbers for the names SSH reports; unknown names map to 0.
fn signal_number(sig: &Sig) -> i32 {
    match sig {
        Sig::ABRT => libc::SIGABRT,
        Sig::ALRM => libc::SIGALRM,
        Sig::FPE => libc::SIGFPE,
        Sig::HUP => libc::SIGHUP,
        Sig::ILL => libc::SIGILL,
        Sig::INT => libc::SIGINT,
        Sig::KILL => libc::SIGKILL,
        Sig::PIPE => libc::SIGPIPE,
        Sig::QUIT => libc::SIGQUIT,
        Sig::SEGV => libc::SIGSEGV,
        Sig::TERM => libc::SIGTERM,
        Sig::USR1 => libc::SIGUSR1,
        _ => 0,
    }
}

impl Transport for SshTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::RemoteShell
    }

    fn process_group(&self) -> Option<u32> {
        None
    }

    fn read_chunk<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            if buf.is_empty() {
                return Ok(0);
            }
            if !self.pending.is_empty() {
                return Ok(self.take_pending(buf));
            }
            while !self.closed {
                let Some(msg) = self.channel.wait().await else {
                    self.closed = true;
                    break;
                };
                if let Some(data) = self.absorb(msg) {
                    if data.is_empty() {
                        continue;
                    }
                    self.pending = data;
                    return Ok(self.take_pending(buf));
                }
            }
            Ok(0)
        })
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.channel
                .data(data)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.channel
                .signal(Sig::TERM)
                .await
                .map_err(|e| io::Error::other(e.to_string()))
        })
    }

    fn wait_exit(&mut self) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            while self.exit_status.is_none() {
                let Some(msg) = self.channel.wait().await else {
                    break;
                };
                if let Some(data) = self.absorb(msg) {
                    self.pending.extend_from_slice(&data);
                }
            }
            Ok(self.exit_status)
        })
    }

    fn close(
        &mut self,
        grace: Duration,
    ) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            let _ = self.channel.eof().await;
            if tokio::time::timeout(grace, self.wait_exit()).await.is_err() {
                tracing::info!(
                    target = %self.target,
                    ?grace,
                    "remote command still running after grace period, closing channel"
                );
            }
            let _ = self.channel.close().await;
            if let Err(err) = self
                .handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                tracing::debug!(error = %err, "SSH disconnect failed");
            }
            self.closed = true;
            Ok(self.exit_status)
        })
    }

    fn take_error_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stderr)
    }
}
