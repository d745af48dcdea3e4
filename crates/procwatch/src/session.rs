//! Running a command and reacting to its output.
//!
//! [`InteractiveSession`] owns one transport for its whole life. It reads
//! the command's output, splits it into lines, echoes each line so a human
//! watching stays in sync, and evaluates it against a
//! [`TriggerTable`](crate::trigger::TriggerTable). Input produced by
//! triggers is written before the next read, so the command sees it in
//! order with its own output.
//!
//! A session ends when the output ends, a termination phrase is seen, an
//! action asks to stop, or it is cancelled through a [`CancelHandle`].
//! Whatever happened is summarised in a [`SessionReport`].

mod control;
mod interactive;
mod report;

#[cfg(unix)]
pub use control::InterruptGuard;
pub use control::CancelHandle;
pub use interactive::InteractiveSession;
pub use report::{ActionErrorRecord, RuleFirings, SessionReport};
