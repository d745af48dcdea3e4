//! procwatch: watch a command's output line by line and react to it
//!
//! This crate runs a command over one of three transports, a plain pipe, a
//! pseudo-terminal or an SSH channel, and feeds every line it prints
//! through a table of trigger rules. Rules run actions, record values and
//! write input back to the command; termination phrases and stop requests
//! end the session early.
//!
//! # Features
//!
//! - **Line buffering** that tolerates split chunks and invalid UTF-8
//! - **Trigger rules** with once/repeatable policies, an after-line
//!   command and termination phrases
//! - **PTY transport** with terminal size tracking and stdin relay
//! - **SSH transport** with known-hosts checking (feature: `ssh`)
//! - **Scripted transport** for tests (feature: `mock`)
//! - **Subscriber setup** for binaries (feature: `logging`)
//!
//! # Example
//!
//! ```no_run
//! use procwatch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let spec = CommandSpec::builder("./installer --interactive").pty().build()?;
//!     let table = TriggerTable::builder()
//!         .once(r"Continue\? \[y/N\]", |ctx| {
//!             ctx.send_line("y");
//!             Ok(())
//!         })
//!         .terminate_on("Installation complete")
//!         .build()?;
//!
//!     let report = InteractiveSession::run(spec, table).await?;
//!     println!("{:?} after {} lines", report.end_reason, report.lines);
//!     Ok(())
//! }
//! ```

extern crate self as procwatch;

// Re-export macros
pub use procwatch_macros::{pattern, triggers};

pub mod blocking;
pub mod command;
pub mod config;
pub mod error;
pub mod line;
pub mod prelude;
pub mod remote;
pub mod session;
pub mod transport;
pub mod trigger;
pub mod types;

/// Scripted transport for tests.
#[cfg(feature = "mock")]
pub mod mock;

/// Subscriber installation for binaries.
#[cfg(feature = "logging")]
pub mod logging;

pub use blocking::BlockingSession;
pub use command::{CommandSpec, CommandSpecBuilder};
pub use config::{EchoTarget, EnvConfig, FileConfig, SessionConfig};
#[cfg(feature = "ssh")]
pub use error::SshError;
pub use error::{ActionError, ActionFailure, ConfigError, Result, SessionError, TransportError};
pub use line::LineBuffer;
#[cfg(feature = "mock")]
pub use mock::{ScriptHandle, ScriptedTransport, TranscriptEvent};
pub use remote::{AuthMethod, DEFAULT_SSH_PORT, HostKeyPolicy, SshTarget};
#[cfg(unix)]
pub use session::InterruptGuard;
pub use session::{CancelHandle, InteractiveSession, SessionReport};
pub use transport::{ExitStatus, Transport};
pub use trigger::{
    AfterLineTrigger, Evaluation, FirePolicy, RuleId, TriggerContext, TriggerPattern, TriggerRule,
    TriggerTable,
};
pub use types::{EndReason, Invocation, SessionState, TransportKind};

// Paths used by macro expansions.
#[doc(hidden)]
pub mod __private {
    pub use regex::Regex;
}
