//! What a session did, returned when it finishes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::transport::ExitStatus;
use crate::trigger::{Evaluation, RuleId, TriggerTable};
use crate::types::{EndReason, SessionState, TransportKind};

/// How often one rule fired during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFirings {
    /// Registration index of the rule.
    pub rule: usize,
    /// The rule's name, if it has one.
    pub name: Option<String>,
    /// Number of lines the rule fired on.
    pub fired: u64,
}

/// The result record of one session.
///
/// Values that actions [`record`](crate::trigger::TriggerContext::record)
/// end up in [`recorded`](Self::recorded); later values overwrite earlier
/// ones with the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    /// The command line that was run.
    pub command: String,
    /// The transport it ran on.
    pub transport: TransportKind,
    /// The final lifecycle state.
    pub state: SessionState,
    /// Why the read loop stopped, if it ran to an end.
    pub end_reason: Option<EndReason>,
    /// Lines read and evaluated.
    pub lines: u64,
    /// Per-rule firing counts, in registration order.
    pub rules: Vec<RuleFirings>,
    /// Whether the after-line command was injected.
    pub after_line_fired: bool,
    /// Values recorded by trigger actions.
    pub recorded: BTreeMap<String, String>,
    /// Trigger actions that failed or panicked.
    pub action_errors: Vec<ActionErrorRecord>,
    /// The exit status, when known.
    pub exit_code: Option<i32>,
    /// Wall time from start to the end of the read loop.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    #[serde(skip)]
    exit_status: Option<ExitStatus>,
}

/// A serializable copy of an [`ActionError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionErrorRecord {
    /// Registration index of the failing rule.
    pub rule: usize,
    /// The rule's name, if it has one.
    pub rule_name: Option<String>,
    /// The line being handled.
    pub line: String,
    /// The error or panic message.
    pub message: String,
}

impl From<&ActionError> for ActionErrorRecord {
    fn from(err: &ActionError) -> Self {
        Self {
            rule: err.rule.index(),
            rule_name: err.rule_name.clone(),
            line: err.line.clone(),
            message: err.message.clone(),
        }
    }
}

impl SessionReport {
    pub(crate) fn new(command: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            command: command.into(),
            transport,
            state: SessionState::Created,
            end_reason: None,
            lines: 0,
            rules: Vec::new(),
            after_line_fired: false,
            recorded: BTreeMap::new(),
            action_errors: Vec::new(),
            exit_code: None,
            elapsed: Duration::ZERO,
            exit_status: None,
        }
    }

    /// Fold one line's evaluation in.
    pub(crate) fn absorb(&mut self, evaluation: &Evaluation) {
        self.lines += 1;
        self.after_line_fired |= evaluation.after_line_fired;
        self.recorded.extend(evaluation.recorded.iter().cloned());
        self.action_errors
            .extend(evaluation.action_errors.iter().map(ActionErrorRecord::from));
    }

    /// Copy the table's per-rule counters.
    pub(crate) fn sync_rules(&mut self, table: &TriggerTable) {
        self.rules = table
            .rules()
            .map(|(id, rule)| RuleFirings {
                rule: id.index(),
                name: rule.name().map(str::to_string),
                fired: rule.fire_count(),
            })
            .collect();
    }

    pub(crate) fn set_exit_status(&mut self, status: Option<ExitStatus>) {
        if status.is_some() {
            self.exit_status = status;
            self.exit_code = status.map(|s| s.as_shell_code());
        }
    }

    /// The exit status, when known. Not preserved by serialization; use
    /// [`exit_code`](Self::exit_code) there.
    #[must_use]
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// How often a rule fired.
    #[must_use]
    pub fn fired(&self, rule: RuleId) -> u64 {
        self.rules
            .iter()
            .find(|r| r.rule == rule.index())
            .map_or(0, |r| r.fired)
    }

    /// A recorded value.
    #[must_use]
    pub fn recorded(&self, key: &str) -> Option<&str> {
        self.recorded.get(key).map(String::as_str)
    }

    /// Render as pretty JSON.
    ///
    /// # Errors
    ///
    /// Serialization of this type does not fail in practice; the error is
    /// passed through from `serde_json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
