//! Small shared types: session state, end reasons, transport kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`InteractiveSession`](crate::InteractiveSession).
///
/// `Created -> Running -> {Completed, Terminated, Failed}`; a failed
/// [`start`](crate::InteractiveSession::start) goes straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Built but not started.
    #[default]
    Created,
    /// Transport spawned; the read loop may be running.
    Running,
    /// Output ended normally.
    Completed,
    /// Stopped early by a termination phrase, an action, or cancellation.
    Terminated,
    /// Could not start, or exited non-zero under strict mode.
    Failed,
}

impl SessionState {
    /// Whether this is one of the final states.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        })
    }
}

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The transport's output reached end-of-stream.
    EndOfStream,
    /// A line contained this termination phrase.
    TerminationPhrase(String),
    /// A trigger action asked the session to stop.
    StopRequested,
    /// [`CancelHandle::cancel`](crate::CancelHandle::cancel) was called.
    Cancelled,
}

impl EndReason {
    /// The lifecycle state this reason leads to.
    #[must_use]
    pub const fn final_state(&self) -> SessionState {
        match self {
            Self::EndOfStream => SessionState::Completed,
            Self::TerminationPhrase(_) | Self::StopRequested | Self::Cancelled => {
                SessionState::Terminated
            }
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of output"),
            Self::TerminationPhrase(phrase) => write!(f, "termination phrase {phrase:?}"),
            Self::StopRequested => f.write_str("stop requested by trigger"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How the command is executed and its output captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process with plain pipes; stdout and stderr are combined.
    #[default]
    LocalPipe,
    /// Child process on a pseudo-terminal; the caller's stdin is relayed.
    LocalPty,
    /// Command executed over an SSH channel.
    RemoteShell,
}

impl TransportKind {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalPipe => "local-pipe",
            Self::LocalPty => "local-pty",
            Self::RemoteShell => "remote-shell",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a local command line becomes a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invocation {
    /// Split the command line with shell quoting rules and exec the
    /// program directly. A missing program fails at start.
    #[default]
    Direct,
    /// Run the command line through `/bin/sh -c`.
    Shell,
}
