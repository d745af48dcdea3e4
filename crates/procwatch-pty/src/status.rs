//! How a watched process ended.

/// Exit code or terminating signal of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// Ended by calling `exit` with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// `true` only for exit code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// The exit code, `None` when killed by a signal.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        if let Self::Exited(code) = *self { Some(code) } else { None }
    }

    /// The terminating signal, `None` after a normal exit.
    #[must_use]
    pub const fn signal(&self) -> Option<i32> {
        if let Self::Signaled(sig) = *self { Some(sig) } else { None }
    }

    /// The number a POSIX shell would put in `$?`: the exit code, or
    /// `128 + signal`.
    #[must_use]
    pub const fn as_shell_code(&self) -> i32 {
        match *self {
            Self::Exited(code) => code,
            Self::Signaled(sig) => 128 + sig,
        }
    }

    /// From a status reported by `std` or Tokio.
    #[cfg(unix)]
    #[must_use]
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt as _;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Exited(code),
            (None, Some(sig)) => Self::Signaled(sig),
            // Stopped or continued; not a final status.
            (None, None) => Self::Exited(-1),
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(sig) => write!(f, "killed by signal {sig}"),
        }
    }
}
