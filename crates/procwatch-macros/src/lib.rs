//! procwatch-macros: Procedural macros for procwatch
//!
//! - [`pattern!`] - A trigger pattern whose regex is checked at compile time
//! - [`triggers!`] - A whole trigger table in one declaration
//!
//! Both expand to paths under `::procwatch`, so use them through the
//! re-exports in that crate.
//!
//! # Example
//!
//! ```ignore
//! use procwatch::{pattern, triggers};
//!
//! let prompt = pattern!(r"^\w+@\w+:\S+\$\s*$");
//!
//! let table = triggers! {
//!     log_id: once r"Log ID: (\S+)" => |ctx| {
//!         let id = ctx.capture(1).unwrap_or_default().to_string();
//!         ctx.record("log_id", id);
//!         Ok(())
//!     },
//!     after "ready for input" => "start",
//!     terminate "Bye bye!",
//! }?;
//! ```

// In proc-macro crates, passing parsed input by value is idiomatic
#![allow(clippy::needless_pass_by_value)]

use proc_macro::TokenStream;
use syn::parse_macro_input;

mod pattern;
mod triggers;

/// A `TriggerPattern` validated at compile time.
///
/// The regex is compiled once, on first use, and cloned from then on.
/// A malformed pattern is a compile error.
///
/// ```ignore
/// let done = pattern!(r"(?i)build (succeeded|failed)");
/// assert!(done.is_match("Build succeeded\n"));
///
/// // let bad = pattern!(r"[unclosed"); // error: invalid regex
/// ```
#[proc_macro]
pub fn pattern(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as pattern::PatternInput);
    pattern::expand(&input.pattern).into()
}

/// Declare a `TriggerTable`.
///
/// Entries are separated by commas:
///
/// ```ignore
/// triggers! {
///     [name:] once "regex" => action,
///     [name:] repeat "regex" => action,
///     after "regex" => "command",
///     terminate "phrase",
/// }
/// ```
///
/// Actions are any expression accepted by `TriggerRule::new`, usually a
/// closure taking `&mut TriggerContext`. Every regex is checked at compile
/// time and empty termination phrases are rejected. The expansion
/// evaluates to `Result<TriggerTable, ConfigError>`.
#[proc_macro]
pub fn triggers(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as triggers::TriggersInput);
    triggers::expand(input).into()
}
