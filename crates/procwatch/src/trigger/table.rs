//! The ordered rule table and per-line evaluation.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::pattern::TriggerPattern;
use super::rule::{
    Action, AfterLineTrigger, Effects, FirePolicy, RuleId, TerminationPhrases, TriggerContext,
    TriggerRule,
};
use crate::error::{ActionError, ActionFailure, ConfigError};

/// What happened when one line was evaluated.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Rules that fired, in registration order.
    pub matched: Vec<RuleId>,
    /// A termination phrase was found; the session must stop.
    pub terminate: bool,
    /// The phrase that caused termination.
    pub termination_phrase: Option<String>,
    /// An action asked the session to stop.
    pub stop_requested: bool,
    /// The after-line trigger fired on this line.
    pub after_line_fired: bool,
    /// Bytes to write to the command's input: action responses first, then
    /// the after-line command.
    pub input: Vec<u8>,
    /// Values recorded by actions.
    pub recorded: Vec<(String, String)>,
    /// Actions that failed or panicked.
    pub action_errors: Vec<ActionError>,
}

impl Evaluation {
    /// Whether the session should stop reading after this line.
    #[must_use]
    pub const fn should_stop(&self) -> bool {
        self.terminate || self.stop_requested
    }
}

/// An ordered set of trigger rules plus the optional after-line trigger and
/// the termination phrases.
///
/// A table belongs to one session at a time; per-rule fire state lives here
/// and is not shared.
#[derive(Debug, Default)]
pub struct TriggerTable {
    rules: Vec<TriggerRule>,
    after_line: Option<AfterLineTrigger>,
    phrases: TerminationPhrases,
}

impl TriggerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a table fluently.
    #[must_use]
    pub fn builder() -> TriggerTableBuilder {
        TriggerTableBuilder::default()
    }

    /// Build a table from the legacy parallel-list form: one pattern, one
    /// action and one "only once" flag per rule.
    ///
    /// # Errors
    ///
    /// Fails if the lists differ in length or a pattern is invalid.
    pub fn from_parallel<I, S>(
        patterns: I,
        actions: Vec<Action>,
        once: &[bool],
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| TriggerPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        if patterns.len() != actions.len() || patterns.len() != once.len() {
            return Err(ConfigError::MismatchedRules {
                patterns: patterns.len(),
                actions: actions.len(),
                policies: once.len(),
            });
        }

        let mut table = Self::new();
        for ((pattern, action), &once) in patterns.into_iter().zip(actions).zip(once) {
            table.push(TriggerRule::from_boxed(
                pattern,
                FirePolicy::from_once(once),
                action,
            ));
        }
        Ok(table)
    }

    /// Append a rule and return its id.
    pub fn push(&mut self, rule: TriggerRule) -> RuleId {
        self.rules.push(rule);
        RuleId::new(self.rules.len() - 1)
    }

    /// Compile `pattern` and append a rule for it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for a malformed pattern.
    pub fn add<F>(
        &mut self,
        pattern: &str,
        policy: FirePolicy,
        action: F,
    ) -> Result<RuleId, ConfigError>
    where
        F: FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    {
        let pattern = TriggerPattern::new(pattern)?;
        Ok(self.push(TriggerRule::new(pattern, policy, action)))
    }

    /// Set the after-line trigger, replacing any previous one.
    pub fn set_after_line(&mut self, trigger: AfterLineTrigger) {
        self.after_line = Some(trigger);
    }

    /// Add a termination phrase.
    ///
    /// # Errors
    ///
    /// Rejects the empty phrase.
    pub fn add_termination_phrase(&mut self, phrase: impl Into<String>) -> Result<(), ConfigError> {
        self.phrases.add(phrase)
    }

    /// The rule with the given id.
    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<&TriggerRule> {
        self.rules.get(id.index())
    }

    /// Iterate rules in registration order.
    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &TriggerRule)> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (RuleId::new(i), rule))
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules, after-line trigger, or phrases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.after_line.is_none() && self.phrases.is_empty()
    }

    /// The after-line trigger, if set.
    #[must_use]
    pub const fn after_line(&self) -> Option<&AfterLineTrigger> {
        self.after_line.as_ref()
    }

    /// The termination phrases.
    #[must_use]
    pub const fn termination_phrases(&self) -> &TerminationPhrases {
        &self.phrases
    }

    /// Disable a rule. Unknown ids and already disabled rules are ignored.
    pub fn disable(&mut self, id: RuleId) {
        if let Some(rule) = self.rules.get_mut(id.index()) {
            rule.disable();
        }
    }

    /// Re-enable a rule switched off with [`disable`](Self::disable).
    /// Unknown ids are ignored.
    pub fn enable(&mut self, id: RuleId) {
        if let Some(rule) = self.rules.get_mut(id.index()) {
            rule.enable();
        }
    }

    /// Re-arm once rules that fired, and the after-line trigger, for a fresh
    /// session. Rules switched off with [`disable`](Self::disable) stay off.
    pub fn reset(&mut self) {
        for rule in &mut self.rules {
            rule.reset();
        }
        if let Some(after) = self.after_line.as_mut() {
            after.reset();
        }
    }

    /// Evaluate one line.
    ///
    /// Termination phrases are checked first; when one is present no action
    /// runs and the after-line trigger is left armed. Otherwise every
    /// enabled matching rule fires in registration order, until an action
    /// requests a stop. Once rules are disabled after firing. Finally the
    /// after-line trigger is checked unless a stop was requested.
    pub fn evaluate(&mut self, line: &str) -> Evaluation {
        let mut evaluation = Evaluation::default();

        if let Some(phrase) = self.phrases.find(line) {
            tracing::info!(phrase, "termination phrase matched");
            evaluation.terminate = true;
            evaluation.termination_phrase = Some(phrase.to_string());
            return evaluation;
        }

        let mut effects = Effects::default();

        for (index, rule) in self.rules.iter_mut().enumerate() {
            if !rule.is_enabled() {
                continue;
            }
            let Some(captures) = rule.pattern.captures(line) else {
                continue;
            };

            let id = RuleId::new(index);
            rule.fire_count += 1;
            if rule.policy == FirePolicy::Once {
                rule.spent = true;
            }
            evaluation.matched.push(id);
            tracing::debug!(rule = %id, name = ?rule.name, "trigger fired");

            let outcome = {
                let name = rule.name.as_deref();
                let mut ctx = TriggerContext::new(line, id, name, Some(captures), &mut effects);
                catch_unwind(AssertUnwindSafe(|| (rule.action)(&mut ctx)))
            };

            let message = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
            };
            if let Some(message) = message {
                let error = ActionError {
                    rule: id,
                    rule_name: rule.name.clone(),
                    line: line.to_string(),
                    message,
                };
                tracing::warn!(
                    rule = %id,
                    name = ?rule.name,
                    line,
                    error = %error.message,
                    "trigger action failed"
                );
                evaluation.action_errors.push(error);
            }

            if effects.stop {
                tracing::info!(rule = %id, "trigger requested stop");
                break;
            }
        }

        evaluation.stop_requested = effects.stop;
        evaluation.input = effects.responses;
        evaluation.recorded = effects.recorded;

        if !evaluation.stop_requested {
            if let Some(after) = self.after_line.as_mut() {
                if after.check(line) {
                    tracing::debug!(pattern = %after.pattern(), "after-line trigger fired");
                    evaluation.after_line_fired = true;
                    evaluation.input.extend_from_slice(after.payload());
                }
            }
        }

        evaluation
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

/// Fluent builder for [`TriggerTable`]. The first invalid pattern or phrase
/// is reported by [`build`](Self::build).
#[derive(Debug, Default)]
#[must_use]
pub struct TriggerTableBuilder {
    table: TriggerTable,
    last: Option<RuleId>,
    error: Option<ConfigError>,
}

impl TriggerTableBuilder {
    /// Add a rule that fires on the first matching line only.
    pub fn once<F>(self, pattern: &str, action: F) -> Self
    where
        F: FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    {
        self.on(pattern, FirePolicy::Once, action)
    }

    /// Add a rule that fires on every matching line.
    pub fn repeatable<F>(self, pattern: &str, action: F) -> Self
    where
        F: FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    {
        self.on(pattern, FirePolicy::Repeatable, action)
    }

    /// Add a rule with an explicit fire policy.
    pub fn on<F>(mut self, pattern: &str, policy: FirePolicy, action: F) -> Self
    where
        F: FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    {
        if self.error.is_none() {
            match TriggerPattern::new(pattern) {
                Ok(pattern) => {
                    self.last = Some(self.table.push(TriggerRule::new(pattern, policy, action)));
                }
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Add a prebuilt rule.
    pub fn rule(mut self, rule: TriggerRule) -> Self {
        self.last = Some(self.table.push(rule));
        self
    }

    /// Name the most recently added rule.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some(rule) = self.last.and_then(|id| self.table.rules.get_mut(id.index())) {
            rule.name = Some(name.into());
        }
        self
    }

    /// Set the after-line trigger.
    pub fn after_line(mut self, pattern: &str, command: impl Into<String>) -> Self {
        if self.error.is_none() {
            match TriggerPattern::new(pattern) {
                Ok(pattern) => self
                    .table
                    .set_after_line(AfterLineTrigger::new(pattern, command)),
                Err(err) => self.error = Some(err),
            }
        }
        self
    }

    /// Add a termination phrase.
    pub fn terminate_on(mut self, phrase: impl Into<String>) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.table.add_termination_phrase(phrase) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Finish the table.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error encountered.
    pub fn build(self) -> Result<TriggerTable, ConfigError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (
        Arc<Mutex<Vec<String>>>,
        impl FnMut(&mut TriggerContext<'_>) -> Result<(), ActionFailure> + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |ctx: &mut TriggerContext<'_>| {
            sink.lock().unwrap().push(ctx.line().to_string());
            Ok(())
        })
    }

    #[test]
    fn rules_fire_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&order), Arc::clone(&order));
        let mut table = TriggerTable::builder()
            .repeatable("x", move |_| {
                a.lock().unwrap().push("first");
                Ok(())
            })
            .repeatable("x", move |_| {
                b.lock().unwrap().push("second");
                Ok(())
            })
            .build()
            .unwrap();

        let eval = table.evaluate("x\n");
        assert_eq!(eval.matched, vec![RuleId::new(0), RuleId::new(1)]);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn once_rule_disables_itself() {
        let (seen, action) = recorder();
        let mut table = TriggerTable::builder().once(r"Log ID: (\S+)", action).build().unwrap();

        table.evaluate("Log ID: abc123\n");
        let second = table.evaluate("Log ID: abc123\n");

        assert!(second.matched.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["Log ID: abc123\n"]);
        let rule = table.rule(RuleId::new(0)).unwrap();
        assert!(rule.has_fired());
        assert!(!rule.is_enabled());
    }

    #[test]
    fn termination_phrase_wins() {
        let (seen, action) = recorder();
        let mut table = TriggerTable::builder()
            .repeatable("Bye", action)
            .after_line("Bye", "never")
            .terminate_on("Bye bye!")
            .build()
            .unwrap();

        let eval = table.evaluate("Bye bye!\n");
        assert!(eval.terminate);
        assert!(eval.should_stop());
        assert_eq!(eval.termination_phrase.as_deref(), Some("Bye bye!"));
        assert!(eval.matched.is_empty());
        assert!(!eval.after_line_fired);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_and_panicking_actions_are_isolated() {
        let (seen, action) = recorder();
        let mut table = TriggerTable::builder()
            .repeatable("line", |_| Err("bad state".into()))
            .named("fails")
            .repeatable("line", |_| panic!("kaboom"))
            .repeatable("line", action)
            .build()
            .unwrap();

        let eval = table.evaluate("line 1\n");
        assert_eq!(eval.matched.len(), 3);
        assert_eq!(eval.action_errors.len(), 2);
        assert_eq!(eval.action_errors[0].rule_name.as_deref(), Some("fails"));
        assert_eq!(eval.action_errors[0].message, "bad state");
        assert!(eval.action_errors[1].message.contains("kaboom"));

        table.evaluate("line 2\n");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn stop_request_skips_later_rules_and_after_line() {
        let (seen, action) = recorder();
        let mut table = TriggerTable::builder()
            .repeatable("go", |ctx| {
                ctx.request_stop();
                Ok(())
            })
            .repeatable("go", action)
            .after_line("go", "next")
            .build()
            .unwrap();

        let eval = table.evaluate("go\n");
        assert!(eval.stop_requested);
        assert!(!eval.terminate);
        assert_eq!(eval.matched, vec![RuleId::new(0)]);
        assert!(!eval.after_line_fired);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn responses_precede_after_line_command() {
        let mut table = TriggerTable::builder()
            .once("ready", |ctx| {
                ctx.send_line("hello");
                ctx.record("greeted", "yes");
                Ok(())
            })
            .after_line("ready for input", "start\n")
            .build()
            .unwrap();

        let eval = table.evaluate("...ready for input...\n");
        assert!(eval.after_line_fired);
        assert_eq!(eval.input, b"hello\nstart\n");
        assert_eq!(eval.recorded, vec![("greeted".into(), "yes".into())]);

        let again = table.evaluate("ready for input\n");
        assert!(!again.after_line_fired);
        assert!(again.input.is_empty());
    }

    #[test]
    fn builder_reports_first_bad_pattern() {
        let err = TriggerTable::builder()
            .repeatable("ok", |_| Ok(()))
            .once("(bad", |_| Ok(()))
            .after_line("[worse", "x")
            .build()
            .unwrap_err();
        match err {
            ConfigError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "(bad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parallel_lists_must_align() {
        let actions: Vec<Action> = vec![Box::new(|_| Ok(()))];
        let err = TriggerTable::from_parallel(["a", "b"], actions, &[true, false]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MismatchedRules {
                patterns: 2,
                actions: 1,
                policies: 2
            }
        ));
    }

    #[test]
    fn parallel_lists_build_rules() {
        let actions: Vec<Action> = vec![Box::new(|_| Ok(())), Box::new(|_| Ok(()))];
        let table = TriggerTable::from_parallel(["a", "b"], actions, &[true, false]).unwrap();
        let policies: Vec<_> = table.rules().map(|(_, r)| r.policy()).collect();
        assert_eq!(policies, vec![FirePolicy::Once, FirePolicy::Repeatable]);
    }

    #[test]
    fn disable_and_reset() {
        let (seen, action) = recorder();
        let mut table = TriggerTable::new();
        let id = table.add("x", FirePolicy::Once, action).unwrap();
        table.disable(id);
        table.disable(id);
        table.disable(RuleId::new(99));
        assert!(table.evaluate("x\n").matched.is_empty());

        table.reset();
        assert!(table.evaluate("x\n").matched.is_empty());

        table.enable(id);
        assert_eq!(table.evaluate("x\n").matched, vec![id]);
        assert!(table.evaluate("x\n").matched.is_empty());
        table.reset();
        assert_eq!(table.evaluate("x\n").matched, vec![id]);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
