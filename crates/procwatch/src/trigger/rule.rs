//! Trigger rules, the after-line trigger, and termination phrases.

use std::fmt;

use regex::Captures;
use serde::{Deserialize, Serialize};

use super::pattern::TriggerPattern;
use crate::error::{ActionFailure, ConfigError};

/// Identity of a rule within its [`TriggerTable`](super::TriggerTable):
/// the registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(usize);

impl RuleId {
    /// Create a rule id from a registration index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The registration index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How often a rule may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirePolicy {
    /// Fire on the first matching line, then stay disabled.
    Once,
    /// Fire on every matching line.
    #[default]
    Repeatable,
}

impl FirePolicy {
    /// Map the legacy "only once" flag.
    #[must_use]
    pub const fn from_once(once: bool) -> Self {
        if once { Self::Once } else { Self::Repeatable }
    }
}

/// A trigger action.
///
/// Actions run synchronously on the session's reader; returning an error
/// or panicking is logged and does not stop the session.
pub type Action = Box<dyn FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send>;

/// Effects requested by actions while one line is evaluated.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) responses: Vec<u8>,
    pub(crate) stop: bool,
    pub(crate) recorded: Vec<(String, String)>,
}

/// What an action sees and can do while handling a line.
pub struct TriggerContext<'a> {
    line: &'a str,
    rule: RuleId,
    rule_name: Option<&'a str>,
    captures: Option<Captures<'a>>,
    effects: &'a mut Effects,
}

impl<'a> TriggerContext<'a> {
    pub(crate) fn new(
        line: &'a str,
        rule: RuleId,
        rule_name: Option<&'a str>,
        captures: Option<Captures<'a>>,
        effects: &'a mut Effects,
    ) -> Self {
        Self {
            line,
            rule,
            rule_name,
            captures,
            effects,
        }
    }

    /// The full line, including its terminator.
    #[must_use]
    pub const fn line(&self) -> &'a str {
        self.line
    }

    /// The firing rule.
    #[must_use]
    pub const fn rule(&self) -> RuleId {
        self.rule
    }

    /// The firing rule's name, if it has one.
    #[must_use]
    pub const fn rule_name(&self) -> Option<&'a str> {
        self.rule_name
    }

    /// Capture group `index` of the match (0 is the whole match).
    #[must_use]
    pub fn capture(&self, index: usize) -> Option<&'a str> {
        self.captures
            .as_ref()
            .and_then(|caps| caps.get(index))
            .map(|m| m.as_str())
    }

    /// Named capture group of the match.
    #[must_use]
    pub fn named(&self, name: &str) -> Option<&'a str> {
        self.captures
            .as_ref()
            .and_then(|caps| caps.name(name))
            .map(|m| m.as_str())
    }

    /// Queue bytes for the command's input. They are written before the
    /// next line is read.
    pub fn send(&mut self, bytes: impl AsRef<[u8]>) {
        self.effects.responses.extend_from_slice(bytes.as_ref());
    }

    /// Queue `text` followed by a newline.
    pub fn send_line(&mut self, text: &str) {
        self.send(text);
        self.effects.responses.push(b'\n');
    }

    /// Ask the session to stop after this line. No further actions start
    /// for the line.
    pub fn request_stop(&mut self) {
        self.effects.stop = true;
    }

    /// Store a value in the session report.
    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.effects.recorded.push((key.into(), value.into()));
    }
}

impl fmt::Debug for TriggerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerContext")
            .field("line", &self.line)
            .field("rule", &self.rule)
            .field("rule_name", &self.rule_name)
            .finish_non_exhaustive()
    }
}

/// A pattern bundled with its action and fire policy.
pub struct TriggerRule {
    pub(crate) pattern: TriggerPattern,
    pub(crate) policy: FirePolicy,
    pub(crate) action: Action,
    pub(crate) name: Option<String>,
    pub(crate) fire_count: u64,
    /// A once rule that has fired. Cleared by `reset`.
    pub(crate) spent: bool,
    /// Switched off by the caller. Survives `reset`.
    pub(crate) disabled: bool,
}

impl TriggerRule {
    /// Create a rule.
    pub fn new<F>(pattern: TriggerPattern, policy: FirePolicy, action: F) -> Self
    where
        F: FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    {
        Self::from_boxed(pattern, policy, Box::new(action))
    }

    /// Create a rule from an already boxed action.
    #[must_use]
    pub fn from_boxed(pattern: TriggerPattern, policy: FirePolicy, action: Action) -> Self {
        Self {
            pattern,
            policy,
            action,
            name: None,
            fire_count: 0,
            spent: false,
            disabled: false,
        }
    }

    /// Give the rule a name for logs and error reports.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The rule's pattern.
    #[must_use]
    pub const fn pattern(&self) -> &TriggerPattern {
        &self.pattern
    }

    /// The rule's fire policy.
    #[must_use]
    pub const fn policy(&self) -> FirePolicy {
        self.policy
    }

    /// The rule's name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the rule has fired at least once.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fire_count > 0
    }

    /// How many times the rule has fired.
    #[must_use]
    pub const fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Whether the rule is still evaluated: not disabled, and not a once
    /// rule that already fired.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.disabled && !self.spent
    }

    /// Stop evaluating this rule until [`enable`](Self::enable). Disabling
    /// twice is a no-op.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    /// Undo [`disable`](Self::disable). A spent once rule stays spent
    /// until reset.
    pub fn enable(&mut self) {
        self.disabled = false;
    }

    /// Re-arm a spent once rule and clear its count. An explicit
    /// [`disable`](Self::disable) is kept.
    pub(crate) fn reset(&mut self) {
        self.fire_count = 0;
        self.spent = false;
    }
}

impl fmt::Debug for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRule")
            .field("pattern", &self.pattern)
            .field("policy", &self.policy)
            .field("name", &self.name)
            .field("fire_count", &self.fire_count)
            .field("spent", &self.spent)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

/// Injects a follow-up command into the session the first time a marker
/// line is seen.
#[derive(Debug, Clone)]
pub struct AfterLineTrigger {
    pattern: TriggerPattern,
    payload: Vec<u8>,
    fired: bool,
}

impl AfterLineTrigger {
    /// Create an after-line trigger. A newline is appended to `command`
    /// unless it already ends with one.
    #[must_use]
    pub fn new(pattern: TriggerPattern, command: impl Into<String>) -> Self {
        let mut payload = command.into().into_bytes();
        if payload.last() != Some(&b'\n') {
            payload.push(b'\n');
        }
        Self {
            pattern,
            payload,
            fired: false,
        }
    }

    /// The marker pattern.
    #[must_use]
    pub const fn pattern(&self) -> &TriggerPattern {
        &self.pattern
    }

    /// The bytes written to the command's input.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the trigger has fired.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    /// Fire if the marker matches and the trigger is still armed.
    pub(crate) fn check(&mut self, line: &str) -> bool {
        if self.fired || !self.pattern.is_match(line) {
            return false;
        }
        self.fired = true;
        true
    }

    pub(crate) fn reset(&mut self) {
        self.fired = false;
    }
}

/// Literal substrings that end the session when seen in a line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationPhrases {
    phrases: Vec<String>,
}

impl TerminationPhrases {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phrase.
    ///
    /// # Errors
    ///
    /// An empty phrase would match every line and is rejected.
    pub fn add(&mut self, phrase: impl Into<String>) -> Result<(), ConfigError> {
        let phrase = phrase.into();
        if phrase.is_empty() {
            return Err(ConfigError::invalid_value(
                "termination phrase",
                "must not be empty",
            ));
        }
        if !self.phrases.contains(&phrase) {
            self.phrases.push(phrase);
        }
        Ok(())
    }

    /// The first phrase contained in `line`.
    #[must_use]
    pub fn find(&self, line: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|phrase| line.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// All phrases in registration order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.phrases
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
