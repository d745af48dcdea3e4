//! Session configuration.
//!
//! [`SessionConfig`] holds the knobs that are independent of the command
//! being run. It can be built in code, overlaid from `PROCWATCH_*`
//! environment variables ([`EnvConfig`]), or loaded together with a
//! command and trigger table from a file ([`FileConfig`]).

pub mod env;
pub mod file;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use env::EnvConfig;
pub use file::FileConfig;

/// Default read chunk size.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Default time between SIGTERM and SIGKILL when closing.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Default terminal width.
pub const DEFAULT_TERMINAL_WIDTH: u16 = 80;

/// Default terminal height.
pub const DEFAULT_TERMINAL_HEIGHT: u16 = 24;

/// Default TERM value for PTY children.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Default SSH connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where echoed output lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoTarget {
    /// The caller's standard output.
    #[default]
    Stdout,
    /// The caller's standard error.
    Stderr,
    /// Do not echo.
    Off,
}

/// Configuration for an [`InteractiveSession`](crate::InteractiveSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Report a non-zero exit as [`SessionError::AbnormalExit`](crate::SessionError::AbnormalExit).
    /// Not applied to LOCAL_PTY.
    pub strict: bool,

    /// Where output lines are echoed.
    pub echo: EchoTarget,

    /// Bytes requested per transport read.
    pub read_chunk_size: usize,

    /// Split lines longer than this many bytes. `None` is unbounded.
    pub max_line_len: Option<usize>,

    /// Time between SIGTERM and SIGKILL when closing a live process.
    pub kill_grace: Duration,

    /// Relay the caller's standard input into a LOCAL_PTY child.
    pub relay_stdin: bool,

    /// Put the caller's terminal into raw mode while relaying.
    pub raw_mode: bool,

    /// Initial PTY window size (columns, rows).
    pub window_size: (u16, u16),

    /// TERM exported to PTY children.
    pub term: String,

    /// Timeout for establishing an SSH connection.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strict: false,
            echo: EchoTarget::default(),
            read_chunk_size: DEFAULT_READ_CHUNK,
            max_line_len: None,
            kill_grace: DEFAULT_KILL_GRACE,
            relay_stdin: true,
            raw_mode: true,
            window_size: (DEFAULT_TERMINAL_WIDTH, DEFAULT_TERMINAL_HEIGHT),
            term: DEFAULT_TERM.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration for unattended runs: no echo, no stdin relay.
    #[must_use]
    pub fn quiet() -> Self {
        Self::default()
            .echo(EchoTarget::Off)
            .relay_stdin(false)
            .raw_mode(false)
    }

    /// Set strict mode.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the echo target.
    #[must_use]
    pub const fn echo(mut self, echo: EchoTarget) -> Self {
        self.echo = echo;
        self
    }

    /// Set the read chunk size. Zero is replaced by the default.
    #[must_use]
    pub const fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = if size == 0 { DEFAULT_READ_CHUNK } else { size };
        self
    }

    /// Limit line length. Zero means unbounded.
    #[must_use]
    pub const fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = if max == 0 { None } else { Some(max) };
        self
    }

    /// Set the kill grace period.
    #[must_use]
    pub const fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Enable or disable stdin relay for LOCAL_PTY.
    #[must_use]
    pub const fn relay_stdin(mut self, relay: bool) -> Self {
        self.relay_stdin = relay;
        self
    }

    /// Enable or disable raw mode while relaying.
    #[must_use]
    pub const fn raw_mode(mut self, raw: bool) -> Self {
        self.raw_mode = raw;
        self
    }

    /// Set the PTY window size.
    #[must_use]
    pub const fn window_size(mut self, cols: u16, rows: u16) -> Self {
        self.window_size = (cols, rows);
        self
    }

    /// Set the TERM value for PTY children.
    #[must_use]
    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    /// Set the SSH connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overlay `PROCWATCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Fails if a variable is set to an unparsable value.
    pub fn with_env_overrides(self) -> Result<Self, crate::ConfigError> {
        EnvConfig::from_process().apply(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert!(!config.strict);
        assert_eq!(config.echo, EchoTarget::Stdout);
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.max_line_len, None);
        assert_eq!(config.kill_grace, Duration::from_secs(2));
        assert_eq!(config.window_size, (80, 24));
        assert_eq!(config.term, "xterm-256color");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builder_chain() {
        let config = SessionConfig::new()
            .strict(true)
            .max_line_len(1024)
            .read_chunk_size(0)
            .window_size(120, 40)
            .term("dumb");
        assert!(config.strict);
        assert_eq!(config.max_line_len, Some(1024));
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK);
        assert_eq!(config.window_size, (120, 40));
        assert_eq!(config.term, "dumb");
        assert_eq!(SessionConfig::new().max_line_len(0).max_line_len, None);
    }

    #[test]
    fn quiet_disables_interaction() {
        let config = SessionConfig::quiet();
        assert_eq!(config.echo, EchoTarget::Off);
        assert!(!config.relay_stdin);
        assert!(!config.raw_mode);
    }
}
