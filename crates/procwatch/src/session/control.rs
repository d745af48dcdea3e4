//! Cross-thread cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    /// Process group to signal; 0 when there is none.
    pgid: AtomicU32,
    notify: Notify,
}

/// Stops a running session from anywhere.
///
/// Clones share state. [`cancel`](Self::cancel) only touches atomics, sends
/// one signal and wakes the read loop, so it is safe to call from another
/// thread or a signal-handling task while the session is reading.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use procwatch::{CommandSpec, InteractiveSession};
/// use procwatch::trigger::TriggerTable;
///
/// # async fn demo() -> procwatch::Result<()> {
/// let spec = CommandSpec::new("tail -f /var/log/syslog")?;
/// let mut session = InteractiveSession::new(spec, TriggerTable::new());
/// let cancel = session.cancel_handle();
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_secs(10)).await;
///     cancel.cancel();
/// });
/// session.start().await?;
/// let report = session.run_until_complete().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    /// A fresh, uncancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation: terminate the process group, if one is
    /// known, and wake the read loop. Calling it again does nothing.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let pgid = self.inner.pgid.load(Ordering::Acquire);
        tracing::info!(pgid, "session cancelled");
        #[cfg(unix)]
        if pgid != 0 {
            if let Err(err) =
                crate::transport::signal_group(pgid, procwatch_pty::PtySignal::Terminate)
            {
                tracing::debug!(pgid, error = %err, "failed to signal process group on cancel");
            }
        }
        self.inner.notify.notify_one();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Wait until cancelled.
    pub(crate) async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }

    pub(crate) fn set_process_group(&self, pgid: Option<u32>) {
        self.inner.pgid.store(pgid.unwrap_or(0), Ordering::Release);
    }

    pub(crate) fn clear_process_group(&self) {
        self.inner.pgid.store(0, Ordering::Release);
    }

    /// Cancel on the first SIGINT (Ctrl-C) received by this process.
    ///
    /// The listener runs as a Tokio task until the returned guard is
    /// dropped. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the signal handler cannot be registered.
    #[cfg(unix)]
    pub fn cancel_on_interrupt(&self) -> std::io::Result<InterruptGuard> {
        use futures::StreamExt;
        use signal_hook_tokio::Signals;

        let signals = Signals::new([libc::SIGINT])?;
        let handle = signals.handle();
        let cancel = self.clone();
        let task = tokio::spawn(async move {
            let mut signals = signals;
            if signals.next().await.is_some() {
                tracing::info!("interrupt received");
                cancel.cancel();
            }
        });
        Ok(InterruptGuard { handle, task })
    }
}

/// Keeps a [`CancelHandle::cancel_on_interrupt`] listener alive.
#[cfg(unix)]
#[derive(Debug)]
pub struct InterruptGuard {
    handle: signal_hook_tokio::Handle,
    task: tokio::task::JoinHandle<()>,
}

#[cfg(unix)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.close();
        self.task.abort();
    }
}
