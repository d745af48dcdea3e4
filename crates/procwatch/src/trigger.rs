//! Trigger rules and their evaluation.
//!
//! A [`TriggerTable`] holds an ordered list of [`TriggerRule`]s, an optional
//! [`AfterLineTrigger`] and a set of [`TerminationPhrases`]. The session
//! hands every complete line to [`TriggerTable::evaluate`] and acts on the
//! returned [`Evaluation`].
//!
//! # Example
//!
//! ```
//! use procwatch::trigger::TriggerTable;
//!
//! let mut table = TriggerTable::builder()
//!     .once(r"Log ID: (\S+)", |ctx| {
//!         let id = ctx.capture(1).unwrap_or_default().to_string();
//!         ctx.record("log_id", id);
//!         Ok(())
//!     })
//!     .after_line("ready for input", "start")
//!     .terminate_on("Bye bye!")
//!     .build()?;
//!
//! let eval = table.evaluate("Log ID: abc123\n");
//! assert_eq!(eval.recorded, vec![("log_id".to_string(), "abc123".to_string())]);
//! # Ok::<(), procwatch::ConfigError>(())
//! ```

mod pattern;
mod rule;
mod table;

pub use pattern::TriggerPattern;
pub use rule::{
    Action, AfterLineTrigger, FirePolicy, RuleId, TerminationPhrases, TriggerContext, TriggerRule,
};
pub use table::{Evaluation, TriggerTable, TriggerTableBuilder};
