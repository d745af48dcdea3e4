//! Relaying the caller's standard input into a PTY child.
//!
//! Reading stdin blocks, so it happens on a dedicated thread that hands
//! chunks to the session over a channel. The thread polls with a short
//! timeout and checks a stop flag in between, which lets [`StdinRelay::stop`]
//! join it on every exit path instead of leaving it parked in `read(2)`.

use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use rustix::event::{PollFd, PollFlags, Timespec, poll};
use tokio::sync::mpsc;

/// Poll timeout between stop-flag checks.
const POLL_INTERVAL: Timespec = Timespec {
    tv_sec: 0,
    tv_nsec: 50_000_000,
};

/// Size of one relayed read.
const RELAY_CHUNK: usize = 1024;

/// A running stdin relay.
#[derive(Debug)]
pub(crate) struct StdinRelay {
    pub(super) rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    raw_mode: bool,
}

impl StdinRelay {
    /// Start relaying. With `raw_mode` and a terminal on stdin, the
    /// terminal is switched to raw mode until the relay stops.
    pub(crate) fn start(raw_mode: bool) -> io::Result<Self> {
        let raw_mode = raw_mode && io::stdin().is_terminal();
        if raw_mode {
            crossterm::terminal::enable_raw_mode()?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("procwatch-stdin".into())
            .spawn(move || relay_loop(&tx, &thread_stop));

        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                if raw_mode {
                    let _ = crossterm::terminal::disable_raw_mode();
                }
                return Err(err);
            }
        };

        tracing::debug!(raw_mode, "stdin relay started");
        Ok(Self {
            rx,
            stop,
            thread: Some(thread),
            raw_mode,
        })
    }

    /// Stop the thread, join it, and restore the terminal.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            tracing::debug!("stdin relay stopped");
        }
        if self.raw_mode {
            self.raw_mode = false;
            if let Err(err) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!(error = %err, "failed to restore terminal mode");
            }
        }
    }
}

impl Drop for StdinRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

fn relay_loop(tx: &mpsc::UnboundedSender<Vec<u8>>, stop: &AtomicBool) {
    let stdin = io::stdin();
    let fd = stdin.as_fd();
    let mut buf = [0u8; RELAY_CHUNK];

    while !stop.load(Ordering::Acquire) {
        match wait_readable(fd) {
            Ok(false) | Err(rustix::io::Errno::INTR) => continue,
            Ok(true) => {}
            Err(err) => {
                tracing::debug!(error = %err, "stdin poll failed, ending relay");
                return;
            }
        }

        match rustix::io::read(fd, &mut buf) {
            Ok(0) => {
                tracing::debug!("stdin reached end of file, ending relay");
                return;
            }
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(rustix::io::Errno::INTR | rustix::io::Errno::AGAIN) => {}
            Err(err) => {
                tracing::debug!(error = %err, "stdin read failed, ending relay");
                return;
            }
        }
    }
}

fn wait_readable(fd: BorrowedFd<'_>) -> rustix::io::Result<bool> {
    let mut fds = [PollFd::new(&fd, PollFlags::IN)];
    if poll(&mut fds, Some(&POLL_INTERVAL))? == 0 {
        return Ok(false);
    }
    Ok(fds[0]
        .revents()
        .intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR))
}
