//! The interactive session: transport lifecycle plus the read-evaluate loop.

use std::fmt;
use std::io::{self, Write};
use std::time::Instant;

use super::control::CancelHandle;
use super::report::SessionReport;
use crate::command::CommandSpec;
use crate::config::{DEFAULT_READ_CHUNK, EchoTarget, SessionConfig};
use crate::error::{Result, SessionError, TransportError};
use crate::line::LineBuffer;
use crate::transport::{self, ExitStatus, Transport};
use crate::trigger::TriggerTable;
use crate::types::{EndReason, SessionState, TransportKind};

/// Where echoed lines go.
enum EchoSink {
    Stdout,
    Stderr,
    Custom(Box<dyn Write + Send>),
    Off,
}

impl EchoSink {
    fn from_target(target: EchoTarget) -> Self {
        match target {
            EchoTarget::Stdout => Self::Stdout,
            EchoTarget::Stderr => Self::Stderr,
            EchoTarget::Off => Self::Off,
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        fn emit(mut out: impl Write, line: &str) -> io::Result<()> {
            out.write_all(line.as_bytes())?;
            out.flush()
        }
        match self {
            Self::Stdout => emit(io::stdout().lock(), line),
            Self::Stderr => emit(io::stderr().lock(), line),
            Self::Custom(sink) => emit(sink, line),
            Self::Off => Ok(()),
        }
    }
}

impl fmt::Debug for EchoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "Stdout",
            Self::Stderr => "Stderr",
            Self::Custom(_) => "Custom",
            Self::Off => "Off",
        })
    }
}

/// Runs one command through a transport and reacts to its output.
///
/// The lifecycle is `Created -> Running -> {Completed, Terminated, Failed}`:
///
/// 1. [`start`](Self::start) spawns or connects the transport.
/// 2. [`run_until_complete`](Self::run_until_complete) reads output line by
///    line, echoes each line, evaluates it against the [`TriggerTable`] and
///    writes any triggered input back before reading on.
/// 3. [`close`](Self::close) releases the transport. `run_until_complete`
///    already does this when the loop ends; it is also safe to call on a
///    session that was never run.
///
/// Dropping a session drops its transport, which kills a still-running
/// process group.
///
/// # Example
///
/// ```no_run
/// use procwatch::{CommandSpec, InteractiveSession};
/// use procwatch::trigger::TriggerTable;
///
/// # async fn demo() -> procwatch::Result<()> {
/// let spec = CommandSpec::builder("./flash.sh").shell().build()?;
/// let table = TriggerTable::builder()
///     .once(r"Log ID: (\S+)", |ctx| {
///         if let Some(id) = ctx.capture(1) {
///             ctx.record("log_id", id);
///         }
///         Ok(())
///     })
///     .after_line("ready for input", "start")
///     .terminate_on("Bye bye!")
///     .build()?;
///
/// let report = InteractiveSession::run(spec, table).await?;
/// println!("log id: {:?}", report.recorded("log_id"));
/// # Ok(())
/// # }
/// ```
pub struct InteractiveSession {
    spec: CommandSpec,
    table: TriggerTable,
    config: SessionConfig,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    injected: Option<Box<dyn Transport>>,
    closed: bool,
    echo: EchoSink,
    echo_failed: bool,
    buffer: LineBuffer,
    cancel: CancelHandle,
    report: SessionReport,
    started: Option<Instant>,
}

impl fmt::Debug for InteractiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveSession")
            .field("command", &self.spec.command_line())
            .field("transport", &self.report.transport)
            .field("state", &self.state)
            .field("rules", &self.table.len())
            .field("echo", &self.echo)
            .field("buffered", &self.buffer.pending_len())
            .finish_non_exhaustive()
    }
}

impl InteractiveSession {
    /// A session with the default configuration.
    #[must_use]
    pub fn new(spec: CommandSpec, table: TriggerTable) -> Self {
        Self::with_config(spec, table, SessionConfig::default())
    }

    /// A session with an explicit configuration.
    #[must_use]
    pub fn with_config(spec: CommandSpec, table: TriggerTable, config: SessionConfig) -> Self {
        let buffer = config
            .max_line_len
            .map_or_else(LineBuffer::new, LineBuffer::with_max_line_len);
        let report = SessionReport::new(spec.command_line(), spec.transport());
        Self {
            echo: EchoSink::from_target(config.echo),
            spec,
            table,
            config,
            state: SessionState::Created,
            transport: None,
            injected: None,
            closed: false,
            echo_failed: false,
            buffer,
            cancel: CancelHandle::new(),
            report,
            started: None,
        }
    }

    /// Run on `transport` instead of the one the command asks for. The
    /// transport must already be running; [`start`](Self::start) adopts it.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.report.transport = transport.kind();
        self.injected = Some(Box::new(transport));
        self
    }

    /// Echo lines to `sink` instead of the configured target.
    #[must_use]
    pub fn with_echo_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.echo = EchoSink::Custom(Box::new(sink));
        self
    }

    /// Build, start, run to completion and close.
    ///
    /// # Errors
    ///
    /// Transport failures from start, read failures, and strict-mode
    /// abnormal exits.
    pub async fn run(spec: CommandSpec, table: TriggerTable) -> Result<SessionReport> {
        Self::new(spec, table).run_to_end().await
    }

    /// [`run`](Self::run) with an explicit configuration.
    ///
    /// # Errors
    ///
    /// As for [`run`](Self::run).
    pub async fn run_with_config(
        spec: CommandSpec,
        table: TriggerTable,
        config: SessionConfig,
    ) -> Result<SessionReport> {
        Self::with_config(spec, table, config).run_to_end().await
    }

    async fn run_to_end(mut self) -> Result<SessionReport> {
        self.start().await?;
        let result = self.run_until_complete().await;
        self.close().await?;
        result
    }

    /// Spawn or connect the transport.
    ///
    /// On failure every resource acquired so far has been released, the
    /// session is `Failed`, and the error names the command line.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless the session is `Created`;
    /// [`SessionError::Transport`] if the command cannot be started.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(SessionError::invalid_state("start", self.state));
        }

        let opened = match self.injected.take() {
            Some(transport) => Ok(transport),
            None => transport::open(&self.spec, &self.config).await,
        };

        match opened {
            Ok(transport) => {
                self.cancel.set_process_group(transport.process_group());
                tracing::info!(
                    command = self.spec.command_line(),
                    transport = %transport.kind(),
                    pgid = ?transport.process_group(),
                    "session started"
                );
                self.transport = Some(transport);
                self.started = Some(Instant::now());
                self.set_state(SessionState::Running);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    command = self.spec.command_line(),
                    error = %err,
                    "session failed to start"
                );
                self.closed = true;
                self.set_state(SessionState::Failed);
                Err(err)
            }
        }
    }

    /// Read, echo and evaluate lines until the output ends, a termination
    /// phrase or stop request arrives, or the session is cancelled. The
    /// transport is closed before this returns.
    ///
    /// There is no built-in timeout: race this against a timer and call
    /// [`cancel`](Self::cancel) to bound it.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless the session is `Running`;
    /// [`SessionError::Transport`] if reading fails;
    /// [`SessionError::AbnormalExit`] in strict mode when a non-PTY command
    /// ends its output and exits non-zero.
    pub async fn run_until_complete(&mut self) -> Result<SessionReport> {
        if self.state != SessionState::Running {
            return Err(SessionError::invalid_state("run", self.state));
        }
        let Some(mut transport) = self.transport.take() else {
            return Err(SessionError::invalid_state("run", self.state));
        };

        let outcome = self.read_loop(transport.as_mut()).await;
        let result = self.finish(transport.as_mut(), outcome).await;
        self.transport = Some(transport);
        result
    }

    async fn read_loop(&mut self, transport: &mut dyn Transport) -> io::Result<EndReason> {
        // The field is public; zero would read nothing and look like EOF.
        let chunk = match self.config.read_chunk_size {
            0 => DEFAULT_READ_CHUNK,
            n => n,
        };
        let mut buf = vec![0u8; chunk];

        loop {
            while let Some(line) = self.buffer.next_line() {
                if let Some(reason) = self.handle_line(transport, &line).await {
                    return Ok(reason);
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(EndReason::Cancelled);
            }

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                read = transport.read_chunk(&mut buf) => Some(read),
            };

            match read {
                None => return Ok(EndReason::Cancelled),
                Some(Ok(0)) => {
                    if let Some(line) = self.buffer.finish() {
                        if let Some(reason) = self.handle_line(transport, &line).await {
                            return Ok(reason);
                        }
                    }
                    return Ok(EndReason::EndOfStream);
                }
                Some(Ok(n)) => self.buffer.extend(&buf[..n]),
                Some(Err(err)) if err.kind() == io::ErrorKind::Interrupted => {}
                Some(Err(err)) => return Err(err),
            }
        }
    }

    /// Echo and evaluate one line, then write whatever it triggered.
    async fn handle_line(
        &mut self,
        transport: &mut dyn Transport,
        line: &str,
    ) -> Option<EndReason> {
        self.echo_line(line);

        let evaluation = self.table.evaluate(line);
        self.report.absorb(&evaluation);

        if evaluation.terminate {
            let phrase = evaluation.termination_phrase.unwrap_or_default();
            return Some(EndReason::TerminationPhrase(phrase));
        }

        if !evaluation.input.is_empty() {
            if let Err(err) = transport.write_all(&evaluation.input).await {
                tracing::warn!(
                    command = self.spec.command_line(),
                    bytes = evaluation.input.len(),
                    error = %err,
                    "failed to write triggered input"
                );
            } else if evaluation.after_line_fired {
                tracing::debug!(bytes = evaluation.input.len(), "injected after-line command");
            }
        }

        evaluation.stop_requested.then_some(EndReason::StopRequested)
    }

    fn echo_line(&mut self, line: &str) {
        if let Err(err) = self.echo.write_line(line) {
            if !self.echo_failed {
                self.echo_failed = true;
                tracing::warn!(
                    error = %err,
                    "failed to echo output; further echo errors are not logged"
                );
            }
        }
    }

    async fn finish(
        &mut self,
        transport: &mut dyn Transport,
        outcome: io::Result<EndReason>,
    ) -> Result<SessionReport> {
        let command = self.spec.command_line().to_string();

        let reason = match outcome {
            Ok(reason) => reason,
            Err(err) => {
                tracing::warn!(command = %command, error = %err, "reading from transport failed");
                self.release(transport).await;
                self.set_state(SessionState::Failed);
                return Err(SessionError::transport(command, TransportError::Io(err)));
            }
        };

        if reason != EndReason::EndOfStream {
            tracing::info!(command = %command, reason = %reason, "stopping command");
            if let Err(err) = transport.terminate().await {
                tracing::debug!(error = %err, "terminate request failed");
            }
        }

        let reason = if reason == EndReason::EndOfStream && !self.await_exit(transport).await {
            EndReason::Cancelled
        } else {
            reason
        };

        let status = self.release(transport).await;
        self.report.end_reason = Some(reason.clone());

        let checks_exit = transport.kind() != TransportKind::LocalPty;
        if self.config.strict && reason == EndReason::EndOfStream && checks_exit {
            if let Some(status) = status.filter(|s| !s.success()) {
                let code = status.as_shell_code();
                tracing::warn!(command = %command, code, "command exited abnormally");
                self.set_state(SessionState::Failed);
                return Err(SessionError::AbnormalExit {
                    command,
                    code,
                    report: Box::new(self.report.clone()),
                });
            }
        }

        self.set_state(reason.final_state());
        tracing::info!(
            command = %command,
            state = %self.state,
            lines = self.report.lines,
            exit = ?status,
            "session finished"
        );
        Ok(self.report.clone())
    }

    /// Output has ended on its own: let the command exit by itself. Only a
    /// cancel cuts the wait short, leaving the rest to `close`; then this
    /// returns `false`.
    async fn await_exit(&mut self, transport: &mut dyn Transport) -> bool {
        let waited = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            status = transport.wait_exit() => Some(status),
        };
        match waited {
            Some(Ok(status)) => self.report.set_exit_status(status),
            Some(Err(err)) => tracing::debug!(error = %err, "waiting for exit failed"),
            None => {
                tracing::info!(
                    command = self.spec.command_line(),
                    "cancelled while waiting for exit"
                );
                return false;
            }
        }
        true
    }

    /// Close the transport, forward its error output and record the outcome.
    async fn release(&mut self, transport: &mut dyn Transport) -> Option<ExitStatus> {
        self.cancel.clear_process_group();
        if let Some(started) = self.started {
            self.report.elapsed = started.elapsed();
        }
        self.report.sync_rules(&self.table);

        self.closed = true;
        let status = match transport.close(self.config.kill_grace).await {
            Ok(status) => {
                self.report.set_exit_status(status);
                status
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to close transport");
                self.report.exit_status()
            }
        };

        // Closing may have drained more of it.
        let error_output = transport.take_error_output();
        if !error_output.is_empty() {
            let mut stderr = io::stderr().lock();
            if let Err(err) = stderr.write_all(&error_output).and_then(|()| stderr.flush()) {
                tracing::debug!(error = %err, "failed to forward error output");
            }
        }
        status
    }

    /// Request the loop to stop and terminate the process group. Safe to
    /// call more than once. Use [`cancel_handle`](Self::cancel_handle) to
    /// cancel from another task or thread.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this session.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The exit status once the session has finished.
    ///
    /// `None` when the transport never reported one (an SSH server may
    /// close the channel without an exit status).
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] while the session is `Created` or
    /// `Running`, or when it failed to start.
    pub async fn wait_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        if !self.state.is_finished() || self.transport.is_none() {
            return Err(SessionError::invalid_state("wait for the exit status of", self.state));
        }
        if let Some(status) = self.report.exit_status() {
            return Ok(Some(status));
        }
        let command = self.spec.command_line().to_string();
        let Some(transport) = self.transport.as_mut() else {
            return Ok(None);
        };
        let status = transport
            .wait_exit()
            .await
            .map_err(|e| SessionError::transport(command, e))?;
        self.report.set_exit_status(status);
        Ok(status)
    }

    /// Release the transport, killing the command if it is still running
    /// after the grace period. Idempotent.
    ///
    /// Closing a session that is still `Running` ends it as `Terminated`.
    ///
    /// # Errors
    ///
    /// Currently infallible once started; close failures are logged.
    pub async fn close(&mut self) -> Result<Option<ExitStatus>> {
        if self.closed {
            return Ok(self.report.exit_status());
        }
        self.injected = None;
        let Some(mut transport) = self.transport.take() else {
            self.closed = true;
            return Ok(None);
        };

        if self.state == SessionState::Running {
            tracing::info!(command = self.spec.command_line(), "closing a running session");
            if let Err(err) = transport.terminate().await {
                tracing::debug!(error = %err, "terminate request failed");
            }
            self.report.end_reason = Some(EndReason::Cancelled);
            self.set_state(SessionState::Terminated);
        }

        let status = self.release(transport.as_mut()).await;
        self.transport = Some(transport);
        Ok(status)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
        }
        self.state = state;
        self.report.state = state;
    }

    /// The lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// What has happened so far.
    #[must_use]
    pub const fn report(&self) -> &SessionReport {
        &self.report
    }

    /// The command being run.
    #[must_use]
    pub const fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The trigger table, with its firing state.
    #[must_use]
    pub const fn table(&self) -> &TriggerTable {
        &self.table
    }

    /// Give back the trigger table, e.g. to [`reset`](TriggerTable::reset)
    /// and reuse it.
    #[must_use]
    pub fn into_table(self) -> TriggerTable {
        self.table
    }
}
