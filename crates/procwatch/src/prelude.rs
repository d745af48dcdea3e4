//! The usual imports in one line.
//!
//! ```
//! use procwatch::prelude::*;
//! ```

// Error handling
pub use crate::error::{ActionError, ConfigError, Result, SessionError, TransportError};

// Commands and configuration
pub use crate::command::CommandSpec;
pub use crate::config::{EchoTarget, SessionConfig};
pub use crate::remote::{AuthMethod, HostKeyPolicy, SshTarget};

// Triggers
pub use crate::trigger::{FirePolicy, TriggerContext, TriggerPattern, TriggerTable};

// Sessions
pub use crate::blocking::BlockingSession;
pub use crate::session::{CancelHandle, InteractiveSession, SessionReport};
pub use crate::transport::ExitStatus;
pub use crate::types::{EndReason, SessionState, TransportKind};

// Macros
pub use crate::{pattern, triggers};
