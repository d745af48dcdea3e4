//! File-based configuration: a command, its transport, session settings and
//! a declarative trigger table in one TOML or JSON document.
//!
//! ```toml
//! command = "dts duckiebot demo --demo_name lane_following"
//! transport = "local_pty"
//!
//! [env]
//! ROBOT = "autobot01"
//!
//! [session]
//! strict = true
//! kill_grace_ms = 500
//!
//! [triggers]
//! terminate_on = ["Bye bye!"]
//! after_line = { pattern = "ready for input", command = "start" }
//!
//! [[triggers.rules]]
//! name = "log id"
//! pattern = 'Log ID: (\S+)'
//! policy = "once"
//! action = { record = { key = "log_id" } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EchoTarget, SessionConfig};
use crate::command::CommandSpec;
use crate::error::ConfigError;
use crate::remote::{AuthMethod, HostKeyPolicy, SshTarget};
use crate::trigger::{
    AfterLineTrigger, FirePolicy, TriggerContext, TriggerPattern, TriggerRule, TriggerTable,
};
use crate::types::{Invocation, TransportKind};

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A complete session description loaded from a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// The command line.
    pub command: String,
    /// The transport.
    pub transport: TransportKind,
    /// Direct execution or `/bin/sh -c`.
    pub invocation: Invocation,
    /// Environment overrides.
    pub env: BTreeMap<String, String>,
    /// Working directory for local transports.
    pub working_directory: Option<PathBuf>,
    /// Start from the caller's environment.
    pub inherit_env: Option<bool>,
    /// SSH target for REMOTE_SHELL.
    pub remote: Option<RemoteSection>,
    /// Session settings.
    pub session: SessionSection,
    /// Trigger table.
    pub triggers: TriggerSection,
}

/// `[remote]`: where a REMOTE_SHELL command runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSection {
    /// Host name or address.
    pub host: String,
    /// Port (22 when omitted).
    pub port: Option<u16>,
    /// User (the current user when omitted).
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Private key file.
    pub key: Option<PathBuf>,
    /// Passphrase for `key`.
    pub passphrase: Option<String>,
    /// Try the SSH agent.
    pub agent: bool,
    /// Host key policy.
    pub host_key: HostKeySetting,
    /// Alternative `known_hosts` file.
    pub known_hosts: Option<PathBuf>,
}

/// Host key policy as written in a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeySetting {
    /// Require a `known_hosts` entry.
    #[default]
    KnownHosts,
    /// Trust on first use.
    AcceptNew,
    /// Require this SHA-256 fingerprint.
    Fingerprint(String),
}

/// `[session]`: overrides for [`SessionConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Strict mode.
    pub strict: Option<bool>,
    /// Echo target.
    pub echo: Option<EchoTarget>,
    /// Read chunk size.
    pub read_chunk_size: Option<usize>,
    /// Maximum line length; 0 is unbounded.
    pub max_line_len: Option<usize>,
    /// Kill grace period in milliseconds.
    pub kill_grace_ms: Option<u64>,
    /// Relay stdin into PTY children.
    pub relay_stdin: Option<bool>,
    /// Raw mode while relaying.
    pub raw_mode: Option<bool>,
    /// PTY columns.
    pub cols: Option<u16>,
    /// PTY rows.
    pub rows: Option<u16>,
    /// TERM for PTY children.
    pub term: Option<String>,
    /// SSH connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// `[triggers]`: the declarative trigger table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerSection {
    /// Ordinary rules, in evaluation order.
    pub rules: Vec<RuleSpec>,
    /// The after-line trigger.
    pub after_line: Option<AfterLineSpec>,
    /// Termination phrases.
    pub terminate_on: Vec<String>,
}

/// One declarative rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Name used in logs and reports.
    #[serde(default)]
    pub name: Option<String>,
    /// Regular expression.
    pub pattern: String,
    /// Fire policy.
    #[serde(default)]
    pub policy: FirePolicy,
    /// What to do on a match.
    pub action: DeclarativeAction,
}

/// The after-line trigger as written in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AfterLineSpec {
    /// Marker pattern.
    pub pattern: String,
    /// Command injected once.
    pub command: String,
}

/// Actions that can be expressed in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarativeAction {
    /// Write text to the command's input as is.
    Send(String),
    /// Write text plus a newline.
    SendLine(String),
    /// Record a capture group in the report.
    Record {
        /// Report key.
        key: String,
        /// Capture group: an index or a name. Defaults to group 1, or the
        /// whole match when the pattern has no groups.
        #[serde(default)]
        group: Option<CaptureGroup>,
    },
    /// End the session after this line.
    Stop,
    /// Log the line at info level.
    Log,
}

/// A capture group reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureGroup {
    /// By index.
    Index(usize),
    /// By name.
    Name(String),
}

impl DeclarativeAction {
    fn run(&self, ctx: &mut TriggerContext<'_>) {
        match self {
            Self::Send(text) => ctx.send(text),
            Self::SendLine(text) => ctx.send_line(text),
            Self::Record { key, group } => {
                let value = match group {
                    Some(CaptureGroup::Index(i)) => ctx.capture(*i),
                    Some(CaptureGroup::Name(name)) => ctx.named(name),
                    None => ctx.capture(1).or_else(|| ctx.capture(0)),
                };
                if let Some(value) = value {
                    let value = value.to_string();
                    ctx.record(key.clone(), value);
                }
            }
            Self::Stop => ctx.request_stop(),
            Self::Log => {
                tracing::info!(
                    rule = %ctx.rule(),
                    name = ?ctx.rule_name(),
                    line = ctx.line().trim_end(),
                    "matched"
                );
            }
        }
    }
}

impl FileConfig {
    /// Load a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, has an unknown extension, or does
    /// not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: "unknown extension, expected .toml or .json".to_string(),
        })?;
        Self::parse(&content, format).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse TOML text.
    ///
    /// # Errors
    ///
    /// Fails if the text does not parse.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, ConfigFormat::Toml).map_err(|reason| ConfigError::Parse {
            path: PathBuf::from("<toml>"),
            reason,
        })
    }

    /// Parse JSON text.
    ///
    /// # Errors
    ///
    /// Fails if the text does not parse.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, ConfigFormat::Json).map_err(|reason| ConfigError::Parse {
            path: PathBuf::from("<json>"),
            reason,
        })
    }

    fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Build the command specification.
    ///
    /// # Errors
    ///
    /// Fails validation like [`CommandSpec::builder`] does.
    pub fn command_spec(&self) -> Result<CommandSpec, ConfigError> {
        let mut builder = CommandSpec::builder(self.command.clone())
            .transport(self.transport)
            .invocation(self.invocation)
            .envs(self.env.clone());
        if let Some(dir) = &self.working_directory {
            builder = builder.working_directory(dir.clone());
        }
        if let Some(inherit) = self.inherit_env {
            builder = builder.inherit_env(inherit);
        }
        if let Some(remote) = &self.remote {
            if self.transport != TransportKind::RemoteShell {
                return Err(ConfigError::invalid_value(
                    "remote",
                    format!("set but transport is {}", self.transport),
                ));
            }
            builder = builder.remote(remote.target()?);
        }
        builder.build()
    }

    /// Overlay the `[session]` section on `base`.
    #[must_use]
    pub fn session_config(&self, base: SessionConfig) -> SessionConfig {
        let s = &self.session;
        let mut config = base;
        if let Some(strict) = s.strict {
            config.strict = strict;
        }
        if let Some(echo) = s.echo {
            config.echo = echo;
        }
        if let Some(size) = s.read_chunk_size {
            config = config.read_chunk_size(size);
        }
        if let Some(max) = s.max_line_len {
            config = config.max_line_len(max);
        }
        if let Some(ms) = s.kill_grace_ms {
            config.kill_grace = Duration::from_millis(ms);
        }
        if let Some(relay) = s.relay_stdin {
            config.relay_stdin = relay;
        }
        if let Some(raw) = s.raw_mode {
            config.raw_mode = raw;
        }
        if let Some(cols) = s.cols {
            config.window_size.0 = cols;
        }
        if let Some(rows) = s.rows {
            config.window_size.1 = rows;
        }
        if let Some(term) = &s.term {
            config.term.clone_from(term);
        }
        if let Some(ms) = s.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Compile the declarative trigger table. Every pattern is validated.
    ///
    /// # Errors
    ///
    /// Returns the first invalid pattern or empty termination phrase.
    pub fn trigger_table(&self) -> Result<TriggerTable, ConfigError> {
        let mut table = TriggerTable::new();
        for spec in &self.triggers.rules {
            let pattern = TriggerPattern::new(&spec.pattern)?;
            let action = spec.action.clone();
            let mut rule = TriggerRule::new(pattern, spec.policy, move |ctx| {
                action.run(ctx);
                Ok(())
            });
            if let Some(name) = &spec.name {
                rule = rule.named(name.clone());
            }
            table.push(rule);
        }
        if let Some(after) = &self.triggers.after_line {
            let pattern = TriggerPattern::new(&after.pattern)?;
            table.set_after_line(AfterLineTrigger::new(pattern, after.command.clone()));
        }
        for phrase in &self.triggers.terminate_on {
            table.add_termination_phrase(phrase.clone())?;
        }
        Ok(table)
    }
}

impl RemoteSection {
    /// Convert to an [`SshTarget`].
    ///
    /// # Errors
    ///
    /// Fails if `host` is empty.
    pub fn target(&self) -> Result<SshTarget, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid_value("remote.host", "must not be empty"));
        }
        let mut target = SshTarget::new(self.host.clone());
        if let Some(port) = self.port {
            target = target.port(port);
        }
        if let Some(user) = &self.user {
            target = target.user(user.clone());
        }
        if let Some(password) = &self.password {
            target = target.password(password.clone());
        }
        if let Some(key) = &self.key {
            target = target.auth(AuthMethod::PrivateKey {
                path: key.clone(),
                passphrase: self.passphrase.clone(),
            });
        }
        if self.agent {
            target = target.agent();
        }
        if let Some(path) = &self.known_hosts {
            target = target.known_hosts_file(path.clone());
        }
        Ok(target.host_key_policy(match &self.host_key {
            HostKeySetting::KnownHosts => HostKeyPolicy::KnownHosts,
            HostKeySetting::AcceptNew => HostKeyPolicy::AcceptNew,
            HostKeySetting::Fingerprint(fp) => HostKeyPolicy::Fingerprint(fp.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
command = "sh -c 'echo hi'"
transport = "local_pty"

[env]
ROBOT = "autobot01"

[session]
strict = true
echo = "off"
kill_grace_ms = 500

[triggers]
terminate_on = ["Bye bye!"]
after_line = { pattern = "ready for input", command = "start" }

[[triggers.rules]]
name = "log id"
pattern = 'Log ID: (\S+)'
policy = "once"
action = { record = { key = "log_id" } }

[[triggers.rules]]
pattern = "password:"
action = { send_line = "secret" }

[[triggers.rules]]
pattern = "FATAL"
action = "stop"
"#;

    #[test]
    fn parse_toml_sample() {
        let config = FileConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.transport, TransportKind::LocalPty);
        assert_eq!(config.triggers.rules.len(), 3);
        assert_eq!(config.triggers.rules[2].action, DeclarativeAction::Stop);

        let spec = config.command_spec().unwrap();
        assert_eq!(spec.argv().unwrap(), ["sh", "-c", "echo hi"]);
        assert_eq!(spec.env().get("ROBOT").map(String::as_str), Some("autobot01"));

        let session = config.session_config(SessionConfig::default());
        assert!(session.strict);
        assert_eq!(session.echo, EchoTarget::Off);
        assert_eq!(session.kill_grace, Duration::from_millis(500));
    }

    #[test]
    fn declarative_table_behaves() {
        let mut table = FileConfig::from_toml_str(SAMPLE)
            .unwrap()
            .trigger_table()
            .unwrap();

        let eval = table.evaluate("Log ID: abc123\n");
        assert_eq!(eval.recorded, vec![("log_id".to_string(), "abc123".to_string())]);
        assert!(table.evaluate("Log ID: zzz\n").recorded.is_empty());

        assert_eq!(table.evaluate("password: \n").input, b"secret\n");
        assert!(table.evaluate("FATAL error\n").stop_requested);
        assert!(table.evaluate("Bye bye!\n").terminate);
    }

    #[test]
    fn json_with_remote() {
        let config = FileConfig::from_json_str(
            r#"{
                "command": "uptime",
                "transport": "remote_shell",
                "remote": { "host": "robot", "user": "duckie", "agent": true,
                            "host_key": { "fingerprint": "SHA256:abc" } }
            }"#,
        )
        .unwrap();
        let spec = config.command_spec().unwrap();
        let target = spec.remote().unwrap();
        assert_eq!(target.user_name(), "duckie");
        assert_eq!(target.host_key(), &HostKeyPolicy::Fingerprint("SHA256:abc".into()));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let config = FileConfig::from_toml_str(
            "command = \"true\"\n[[triggers.rules]]\npattern = \"(oops\"\naction = \"log\"\n",
        )
        .unwrap();
        assert!(matches!(
            config.trigger_table(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            FileConfig::from_toml_str("command = \"true\"\nbogus = 1\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn remote_section_requires_remote_transport() {
        let text = "command = \"uptime\"\n[remote]\nhost = \"robot\"\n";
        let config = FileConfig::from_toml_str(text).unwrap();
        assert!(matches!(
            config.command_spec(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn load_detects_format() {
        let dir = std::env::temp_dir().join(format!("procwatch-file-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");
        std::fs::write(&path, r#"{ "command": "echo hi" }"#).unwrap();
        assert_eq!(FileConfig::load(&path).unwrap().command, "echo hi");

        let bad = dir.join("session.yaml");
        std::fs::write(&bad, "command: x").unwrap();
        assert!(matches!(FileConfig::load(&bad), Err(ConfigError::Parse { .. })));

        assert!(matches!(
            FileConfig::load(dir.join("missing.toml")),
            Err(ConfigError::File { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
