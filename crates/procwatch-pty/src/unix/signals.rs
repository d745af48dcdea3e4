//! Process-group signalling and SIGWINCH watching.

use std::io;
use std::thread::JoinHandle;

use rustix::process::{Pid, Signal, kill_process_group};
use signal_hook::consts::signal::SIGWINCH;
use signal_hook::iterator::{Handle, Signals};

use crate::config::PtySignal;
use crate::error::{PtyError, Result, errno_to_io};

/// Send `signal` to every process in group `pgid`.
///
/// A group that no longer exists (`ESRCH`) is not an error: the processes
/// are already gone.
pub fn signal_process_group(pgid: u32, signal: PtySignal) -> Result<()> {
    let pid = Pid::from_raw(pgid as i32).ok_or_else(|| {
        PtyError::Signal(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group",
        ))
    })?;
    let sig = Signal::from_named_raw(signal.as_raw()).ok_or_else(|| {
        PtyError::Signal(io::Error::new(io::ErrorKind::InvalidInput, "invalid signal"))
    })?;

    match kill_process_group(pid, sig) {
        Ok(()) => {
            tracing::debug!(pgid, %signal, "signalled process group");
            Ok(())
        }
        Err(rustix::io::Errno::SRCH) => Ok(()),
        Err(e) => Err(PtyError::Signal(errno_to_io(e))),
    }
}

/// Runs a callback on every SIGWINCH delivered to this process.
///
/// Dropping the watcher (or calling [`stop`](Self::stop)) closes the
/// signal iterator and joins the background thread.
#[derive(Debug)]
pub struct WindowWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl WindowWatcher {
    /// Start watching for window size changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be registered or the
    /// thread cannot be started.
    pub fn start<F>(mut on_change: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let mut signals = Signals::new([SIGWINCH])?;
        let handle = signals.handle();

        let thread = std::thread::Builder::new()
            .name("procwatch-sigwinch".into())
            .spawn(move || {
                for _ in signals.forever() {
                    on_change();
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stop watching and join the background thread.
    pub fn stop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WindowWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
