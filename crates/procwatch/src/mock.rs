//! A scripted in-memory transport for tests.
//!
//! [`ScriptedTransport`] plays back output chunks and records everything the
//! session does to it, in order, so tests can check not only *what* was
//! written but *when*: for instance that an injected command was written
//! before the next chunk was read.
//!
//! # Example
//!
//! ```
//! use procwatch::mock::{ScriptedTransport, TranscriptEvent};
//!
//! let transport = ScriptedTransport::new()
//!     .line("Ready")
//!     .line("Bye bye!")
//!     .exit_code(0);
//! let handle = transport.handle();
//! // Hand `transport` to `InteractiveSession::with_transport`, run it,
//! // then inspect `handle.log()`.
//! assert!(handle.log().is_empty());
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::{ExitStatus, Transport};
use crate::types::TransportKind;

/// One thing that happened to a scripted transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// The session read these bytes.
    Read(Vec<u8>),
    /// The session wrote these bytes.
    Write(Vec<u8>),
    /// The session asked the command to terminate.
    Terminate,
    /// The session closed the transport.
    Close,
}

#[derive(Debug, Default)]
struct ScriptState {
    chunks: VecDeque<Vec<u8>>,
    replies: VecDeque<(Vec<u8>, Vec<u8>)>,
    log: Vec<TranscriptEvent>,
    exit: Option<ExitStatus>,
    stderr: Vec<u8>,
    stderr_at_exit: Vec<u8>,
    stderr_taken: Vec<u8>,
    hang: bool,
    terminated: bool,
    closed: bool,
}

impl ScriptState {
    /// Whether a read with nothing queued should wait rather than end.
    fn waits(&self) -> bool {
        !self.terminated && !self.closed && (self.hang || !self.replies.is_empty())
    }

    fn reach_exit(&mut self) {
        let late = std::mem::take(&mut self.stderr_at_exit);
        self.stderr.extend_from_slice(&late);
    }

    fn exit_status(&self) -> ExitStatus {
        match self.exit {
            Some(status) => status,
            None if self.terminated => ExitStatus::Signaled(libc::SIGTERM),
            None => ExitStatus::Exited(0),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ScriptState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A transport that replays scripted output.
///
/// With nothing left to read, reads report end-of-stream, unless the
/// script [hangs](Self::hang) or still has [replies](Self::reply) waiting
/// for input; then they wait until terminated or closed.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
    kind: Option<TransportKind>,
}

impl ScriptedTransport {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw output chunk. Chunks need not end on line boundaries.
    #[must_use]
    pub fn chunk(self, bytes: impl AsRef<[u8]>) -> Self {
        self.shared.lock().chunks.push_back(bytes.as_ref().to_vec());
        self
    }

    /// Queue `text` followed by a newline as one chunk.
    #[must_use]
    pub fn line(self, text: &str) -> Self {
        self.chunk(format!("{text}\n"))
    }

    /// When a write containing `input` arrives, queue `output`. Replies
    /// are matched in the order they were added.
    #[must_use]
    pub fn reply(self, input: impl AsRef<[u8]>, output: impl AsRef<[u8]>) -> Self {
        self.shared
            .lock()
            .replies
            .push_back((input.as_ref().to_vec(), output.as_ref().to_vec()));
        self
    }

    /// Keep the stream open after the last chunk until terminated.
    #[must_use]
    pub fn hang(self) -> Self {
        self.shared.lock().hang = true;
        self
    }

    /// The exit code reported once the command is done.
    #[must_use]
    pub fn exit_code(self, code: i32) -> Self {
        self.exit_status(ExitStatus::Exited(code))
    }

    /// The exit status reported once the command is done.
    #[must_use]
    pub fn exit_status(self, status: ExitStatus) -> Self {
        self.shared.lock().exit = Some(status);
        self
    }

    /// Output kept out of the line loop, as SSH stderr is.
    #[must_use]
    pub fn error_output(self, bytes: impl AsRef<[u8]>) -> Self {
        self.shared.lock().stderr.extend_from_slice(bytes.as_ref());
        self
    }

    /// Error output that only arrives once the session waits for the exit
    /// status or closes, as trailing SSH stderr does.
    #[must_use]
    pub fn error_output_at_exit(self, bytes: impl AsRef<[u8]>) -> Self {
        self.shared
            .lock()
            .stderr_at_exit
            .extend_from_slice(bytes.as_ref());
        self
    }

    /// Pretend to be a different transport kind. Defaults to LOCAL_PIPE.
    #[must_use]
    pub const fn kind(mut self, kind: TransportKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// A handle for inspecting the transcript after the transport has been
    /// handed to a session.
    #[must_use]
    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind.unwrap_or(TransportKind::LocalPipe)
    }

    fn process_group(&self) -> Option<u32> {
        None
    }

    fn read_chunk<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(async move {
            loop {
                let notified = self.shared.wake.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = self.shared.lock();
                    if let Some(mut chunk) = state.chunks.pop_front() {
                        let n = chunk.len().min(buf.len());
                        buf[..n].copy_from_slice(&chunk[..n]);
                        let rest = chunk.split_off(n);
                        if !rest.is_empty() {
                            state.chunks.push_front(rest);
                        }
                        state.log.push(TranscriptEvent::Read(chunk));
                        return Ok(n);
                    }
                    if !state.waits() {
                        return Ok(0);
                    }
                }

                notified.await;
            }
        })
    }

    fn write_all<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport is closed"));
            }
            state.log.push(TranscriptEvent::Write(data.to_vec()));
            if state
                .replies
                .front()
                .is_some_and(|(input, _)| contains(data, input))
            {
                if let Some((_, output)) = state.replies.pop_front() {
                    state.chunks.push_back(output);
                }
            }
            drop(state);
            self.shared.wake.notify_waiters();
            Ok(())
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            {
                let mut state = self.shared.lock();
                state.terminated = true;
                state.log.push(TranscriptEvent::Terminate);
            }
            self.shared.wake.notify_waiters();
            Ok(())
        })
    }

    fn wait_exit(&mut self) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            let mut state = self.shared.lock();
            state.reach_exit();
            Ok(Some(state.exit_status()))
        })
    }

    fn close(
        &mut self,
        _grace: Duration,
    ) -> BoxFuture<'_, Result<Option<ExitStatus>, TransportError>> {
        Box::pin(async move {
            let status = {
                let mut state = self.shared.lock();
                if !state.closed {
                    state.closed = true;
                    state.log.push(TranscriptEvent::Close);
                }
                state.reach_exit();
                state.exit_status()
            };
            self.shared.wake.notify_waiters();
            Ok(Some(status))
        })
    }

    fn take_error_output(&mut self) -> Vec<u8> {
        let mut state = self.shared.lock();
        let taken = std::mem::take(&mut state.stderr);
        state.stderr_taken.extend_from_slice(&taken);
        taken
    }
}

/// Read access to a [`ScriptedTransport`]'s transcript.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    shared: Arc<Shared>,
}

impl ScriptHandle {
    /// Every read, write, terminate and close, in order.
    #[must_use]
    pub fn log(&self) -> Vec<TranscriptEvent> {
        self.shared.lock().log.clone()
    }

    /// Just the writes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .log
            .iter()
            .filter_map(|event| match event {
                TranscriptEvent::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// All written bytes concatenated, lossily decoded.
    #[must_use]
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.writes().concat()).into_owned()
    }

    /// Whether the session asked the command to terminate.
    #[must_use]
    pub fn was_terminated(&self) -> bool {
        self.shared.lock().terminated
    }

    /// Whether the session closed the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Error output the session took for forwarding, in order.
    #[must_use]
    pub fn error_output_taken(&self) -> Vec<u8> {
        self.shared.lock().stderr_taken.clone()
    }

    /// Chunks still queued, i.e. output the session never read.
    #[must_use]
    pub fn unread(&self) -> usize {
        self.shared.lock().chunks.len()
    }

    /// Queue more output while the transport is in use.
    pub fn push_chunk(&self, bytes: impl AsRef<[u8]>) {
        self.shared.lock().chunks.push_back(bytes.as_ref().to_vec());
        self.shared.wake.notify_waiters();
    }

    /// End a hanging script: pending reads see end-of-stream once the
    /// queue drains.
    pub fn finish(&self) {
        {
            let mut state = self.shared.lock();
            state.hang = false;
            state.replies.clear();
        }
        self.shared.wake.notify_waiters();
    }
}
