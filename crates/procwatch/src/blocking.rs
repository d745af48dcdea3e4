//! A synchronous wrapper around [`InteractiveSession`].
//!
//! For callers without an async runtime: every method blocks on a private
//! current-thread Tokio runtime. Do not use it from inside an async task;
//! use [`InteractiveSession`] directly there.

use tokio::runtime::{Builder, Runtime};

use crate::command::CommandSpec;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::{CancelHandle, InteractiveSession, SessionReport};
use crate::transport::ExitStatus;
use crate::trigger::TriggerTable;
use crate::types::SessionState;

/// A blocking interactive session.
///
/// # Example
///
/// ```no_run
/// use procwatch::CommandSpec;
/// use procwatch::blocking::BlockingSession;
/// use procwatch::trigger::TriggerTable;
///
/// let spec = CommandSpec::new("make test")?;
/// let table = TriggerTable::builder().terminate_on("FAILED").build()?;
/// let report = BlockingSession::run(spec, table)?;
/// println!("{} lines", report.lines);
/// # Ok::<(), procwatch::SessionError>(())
/// ```
#[derive(Debug)]
pub struct BlockingSession {
    // Dropped before the runtime its transport is registered with.
    inner: InteractiveSession,
    runtime: Runtime,
}

impl BlockingSession {
    /// A session with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails if the runtime cannot be created.
    pub fn new(spec: CommandSpec, table: TriggerTable) -> Result<Self> {
        Self::from_session(InteractiveSession::new(spec, table))
    }

    /// A session with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Fails if the runtime cannot be created.
    pub fn with_config(
        spec: CommandSpec,
        table: TriggerTable,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::from_session(InteractiveSession::with_config(spec, table, config))
    }

    /// Wrap a session that has not been started yet.
    ///
    /// # Errors
    ///
    /// Fails if the runtime cannot be created.
    pub fn from_session(inner: InteractiveSession) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    /// Start, run to completion and close.
    ///
    /// # Errors
    ///
    /// As for [`InteractiveSession::run`].
    pub fn run(spec: CommandSpec, table: TriggerTable) -> Result<SessionReport> {
        let mut session = Self::new(spec, table)?;
        session.start()?;
        let result = session.run_until_complete();
        session.close()?;
        result
    }

    /// See [`InteractiveSession::start`].
    ///
    /// # Errors
    ///
    /// As for [`InteractiveSession::start`].
    pub fn start(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.start())
    }

    /// See [`InteractiveSession::run_until_complete`].
    ///
    /// # Errors
    ///
    /// As for [`InteractiveSession::run_until_complete`].
    pub fn run_until_complete(&mut self) -> Result<SessionReport> {
        self.runtime.block_on(self.inner.run_until_complete())
    }

    /// See [`InteractiveSession::wait_exit_status`].
    ///
    /// # Errors
    ///
    /// As for [`InteractiveSession::wait_exit_status`].
    pub fn wait_exit_status(&mut self) -> Result<Option<ExitStatus>> {
        self.runtime.block_on(self.inner.wait_exit_status())
    }

    /// See [`InteractiveSession::close`].
    ///
    /// # Errors
    ///
    /// As for [`InteractiveSession::close`].
    pub fn close(&mut self) -> Result<Option<ExitStatus>> {
        self.runtime.block_on(self.inner.close())
    }

    /// Cancel the session. Callable from another thread through
    /// [`cancel_handle`](Self::cancel_handle).
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// A handle that cancels this session from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    /// The lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// What has happened so far.
    #[must_use]
    pub const fn report(&self) -> &SessionReport {
        self.inner.report()
    }

    /// The async session inside.
    #[must_use]
    pub const fn session(&self) -> &InteractiveSession {
        &self.inner
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_a_command_synchronously() {
        let spec = CommandSpec::builder("echo one; echo two").shell().build().unwrap();
        let table = TriggerTable::builder()
            .repeatable("^t", |ctx| {
                ctx.record("t-line", ctx.line().trim_end());
                Ok(())
            })
            .build()
            .unwrap();
        let config = SessionConfig::quiet();
        let mut session = BlockingSession::with_config(spec, table, config).unwrap();
        session.start().unwrap();
        let report = session.run_until_complete().unwrap();

        assert_eq!(report.lines, 2);
        assert_eq!(report.recorded("t-line"), Some("two"));
        assert_eq!(session.wait_exit_status().unwrap(), Some(ExitStatus::Exited(0)));
    }

    #[test]
    fn cancel_from_another_thread() {
        let spec = CommandSpec::new("sleep 30").unwrap();
        let config = SessionConfig::quiet();
        let mut session = BlockingSession::with_config(spec, TriggerTable::new(), config).unwrap();
        session.start().unwrap();

        let cancel = session.cancel_handle();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let report = session.run_until_complete().unwrap();
        canceller.join().unwrap();
        assert_eq!(report.state, SessionState::Terminated);
        assert_eq!(
            report.exit_status().and_then(|s| s.signal()),
            Some(libc::SIGTERM)
        );
    }
}
