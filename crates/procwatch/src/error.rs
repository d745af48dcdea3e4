//! Error types for procwatch.
//!
//! Configuration problems are reported while a session is being built,
//! transport problems when it starts, and abnormal exits (strict mode only)
//! when it finishes. Failures inside trigger actions never become a
//! [`SessionError`]: they are logged and collected as [`ActionError`]s.

use std::path::PathBuf;
#[cfg(feature = "ssh")]
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionReport;
use crate::trigger::RuleId;
use crate::types::SessionState;

/// The error type returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session could not be configured.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport could not be established or failed while running.
    #[error("transport error running `{command}`: {source}")]
    Transport {
        /// The command line that was attempted.
        command: String,
        /// The underlying cause.
        #[source]
        source: TransportError,
    },

    /// The command finished with a non-zero status (strict mode only).
    #[error("`{command}` exited abnormally with code {code}")]
    AbnormalExit {
        /// The command line that was run.
        command: String,
        /// Exit code, or `128 + signal` for signal deaths.
        code: i32,
        /// What happened before the exit.
        report: Box<SessionReport>,
    },

    /// An operation was called in a state that does not allow it.
    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors detected while building a command, trigger table or configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The command line is empty or only whitespace.
    #[error("command line is empty")]
    EmptyCommand,

    /// The command line could not be split into arguments.
    #[error("invalid command line `{command}`: {reason}")]
    InvalidCommand {
        /// The offending command line.
        command: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A trigger pattern is not a valid regular expression.
    #[error("invalid trigger pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// The regex compiler's complaint.
        #[source]
        source: Box<regex::Error>,
    },

    /// Parallel pattern/action/policy lists have different lengths.
    #[error(
        "mismatched rule lists: {patterns} patterns, {actions} actions, {policies} fire policies"
    )]
    MismatchedRules {
        /// Number of patterns.
        patterns: usize,
        /// Number of actions.
        actions: usize,
        /// Number of fire policies.
        policies: usize,
    },

    /// A remote-shell command was built without a remote target.
    #[error("remote shell transport requires an SSH target")]
    MissingRemoteTarget,

    /// The transport is not available in this build.
    #[error("{transport} transport is not available: {reason}")]
    UnsupportedTransport {
        /// The requested transport.
        transport: &'static str,
        /// Why it is unavailable.
        reason: &'static str,
    },

    /// An environment variable name or value cannot be passed to a process.
    #[error("invalid environment variable `{name}`: {reason}")]
    InvalidEnvironment {
        /// The variable name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A configuration value is out of range or malformed.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The setting name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    File {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse config file {}: {reason}", path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// The parser's message.
        reason: String,
    },
}

/// Errors raised while establishing or driving a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The local process could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// The program that was attempted.
        program: String,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A PTY operation failed.
    #[error(transparent)]
    Pty(#[from] procwatch_pty::PtyError),

    /// An SSH operation failed.
    #[cfg(feature = "ssh")]
    #[error(transparent)]
    Ssh(#[from] SshError),

    /// An I/O error on the transport's streams.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was already closed.
    #[error("transport is closed")]
    Closed,
}

/// Failures specific to the REMOTE_SHELL transport.
#[cfg(feature = "ssh")]
#[derive(Debug, Error)]
pub enum SshError {
    /// No SSH session could be established with the host.
    #[error("cannot reach {host}:{port}: {reason}")]
    Connection {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
        /// What went wrong.
        reason: String,
    },

    /// The server accepted none of the configured credentials.
    #[error("no accepted credentials for '{user}' ({reason})")]
    Authentication {
        /// Remote user.
        user: String,
        /// Methods tried and how they failed.
        reason: String,
    },

    /// The server key did not satisfy the host key policy.
    #[error("host key of {host} rejected: {reason}")]
    HostKeyRejected {
        /// Host name or address.
        host: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// A private key could not be loaded.
    #[error("failed to load key {}: {reason}", path.display())]
    Key {
        /// The key file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The session channel could not be opened or the command not started.
    #[error("ssh channel: {reason}")]
    Channel {
        /// What went wrong.
        reason: String,
    },

    /// The handshake did not finish within the connect timeout.
    #[error("no ssh handshake within {limit:?}")]
    ConnectTimeout {
        /// The configured timeout.
        limit: Duration,
    },
}

/// A trigger action that failed or panicked while handling a line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trigger {rule}{} failed on line {line:?}: {message}", name_suffix(rule_name.as_deref()))]
pub struct ActionError {
    /// The rule whose action failed.
    pub rule: RuleId,
    /// The rule's name, if it has one.
    pub rule_name: Option<String>,
    /// The line being handled.
    pub line: String,
    /// The error or panic message.
    pub message: String,
}

fn name_suffix(name: Option<&str>) -> String {
    name.map(|n| format!(" ({n})")).unwrap_or_default()
}

/// The error type trigger actions return.
pub type ActionFailure = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for procwatch operations.
pub type Result<T> = std::result::Result<T, SessionError>;

impl SessionError {
    /// Wrap a transport error with the command line that was attempted.
    pub fn transport(command: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Self::Transport {
            command: command.into(),
            source: source.into(),
        }
    }

    /// Create an invalid-state error.
    #[must_use]
    pub const fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Whether this is a strict-mode abnormal exit.
    #[must_use]
    pub const fn is_abnormal_exit(&self) -> bool {
        matches!(self, Self::AbnormalExit { .. })
    }

    /// The session report carried by an abnormal exit.
    #[must_use]
    pub fn report(&self) -> Option<&SessionReport> {
        match self {
            Self::AbnormalExit { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Create an invalid-pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid-value error.
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl TransportError {
    /// Create a spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

#[cfg(feature = "ssh")]
impl SshError {
    pub(crate) fn connection(
        host: impl Into<String>,
        port: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self::Connection {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    pub(crate) fn authentication(user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            user: user.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn host_key_rejected(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HostKeyRejected {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_names_command_and_cause() {
        let err = SessionError::transport(
            "missing-tool --flag",
            TransportError::spawn(
                "missing-tool",
                std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            ),
        );
        let msg = err.to_string();
        assert!(msg.contains("missing-tool --flag"));
        assert!(msg.contains("No such file or directory"));
    }

    #[test]
    fn invalid_pattern_message() {
        let source = regex::Regex::new("(unclosed").unwrap_err();
        let err = ConfigError::invalid_pattern("(unclosed", source);
        assert!(err.to_string().starts_with("invalid trigger pattern `(unclosed`"));
    }

    #[test]
    fn action_error_display() {
        let err = ActionError {
            rule: RuleId::new(2),
            rule_name: Some("capture".into()),
            line: "Log ID: abc\n".into(),
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "trigger #2 (capture) failed on line \"Log ID: abc\\n\": boom"
        );
    }

    #[test]
    fn invalid_state_display() {
        let err = SessionError::invalid_state("start", SessionState::Running);
        assert_eq!(err.to_string(), "cannot start a session that is running");
        assert!(!err.is_abnormal_exit());
        assert!(err.report().is_none());
    }
}
