//! Environment-based configuration.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use super::{EchoTarget, SessionConfig};
use crate::error::ConfigError;

/// Environment variable prefix.
pub const DEFAULT_PREFIX: &str = "PROCWATCH";

/// Variable names, without the prefix.
pub mod vars {
    /// Strict mode (`PROCWATCH_STRICT`).
    pub const STRICT: &str = "STRICT";
    /// Echo target: `stdout`, `stderr`, `off`, or a boolean.
    pub const ECHO: &str = "ECHO";
    /// Read chunk size in bytes.
    pub const READ_CHUNK: &str = "READ_CHUNK";
    /// Maximum line length in bytes; 0 is unbounded.
    pub const MAX_LINE_LEN: &str = "MAX_LINE_LEN";
    /// Kill grace period in milliseconds.
    pub const KILL_GRACE_MS: &str = "KILL_GRACE_MS";
    /// Relay stdin into PTY children.
    pub const RELAY_STDIN: &str = "RELAY_STDIN";
    /// Raw mode while relaying.
    pub const RAW_MODE: &str = "RAW_MODE";
    /// TERM for PTY children.
    pub const TERM: &str = "TERM";
    /// PTY columns.
    pub const COLS: &str = "COLS";
    /// PTY rows.
    pub const ROWS: &str = "ROWS";
    /// SSH connect timeout in milliseconds.
    pub const CONNECT_TIMEOUT_MS: &str = "CONNECT_TIMEOUT_MS";
    /// Log filter directive, as for `RUST_LOG`.
    pub const LOG: &str = "LOG";
    /// Log format: `text` or `json`.
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

/// A snapshot of prefixed environment variables.
///
/// The snapshot is taken once, so lookups are pure; tests inject their own
/// variables with [`from_vars`](Self::from_vars) instead of mutating the
/// process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvConfig {
    /// Snapshot the process environment.
    #[must_use]
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Use the given variables instead of the process environment.
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::with_prefix(DEFAULT_PREFIX, vars)
    }

    /// Use a different prefix.
    #[must_use]
    pub fn with_prefix<I, K, V>(prefix: impl Into<String>, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.into();
        let wanted = format!("{prefix}_");
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&wanted))
            .collect();
        Self { prefix, vars }
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name.to_uppercase())
    }

    /// Raw value of a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&self.var_name(name)).map(String::as_str)
    }

    /// Whether a variable is set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Parse a variable.
    ///
    /// # Errors
    ///
    /// Fails if the variable is set but does not parse.
    pub fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(name)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|e: T::Err| {
                        ConfigError::invalid_value(self.var_name(name), e.to_string())
                    })
            })
            .transpose()
    }

    /// Parse a boolean: `1/true/yes/on/enabled` or `0/false/no/off/disabled`.
    ///
    /// # Errors
    ///
    /// Fails on any other value.
    pub fn bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        self.get(name)
            .map(|raw| {
                parse_bool(raw).ok_or_else(|| {
                    let reason = format!("not a boolean: {raw:?}");
                    ConfigError::invalid_value(self.var_name(name), reason)
                })
            })
            .transpose()
    }

    /// Parse a duration given in milliseconds.
    ///
    /// # Errors
    ///
    /// Fails if the value is not a non-negative integer.
    pub fn duration_millis(&self, name: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }

    /// The log filter directive (`PROCWATCH_LOG`).
    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.get(vars::LOG)
    }

    /// Whether JSON logs were requested (`PROCWATCH_LOG_FORMAT=json`).
    #[must_use]
    pub fn log_json(&self) -> bool {
        self.get(vars::LOG_FORMAT)
            .is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
    }

    /// Overlay the variables that are set on `config`.
    ///
    /// # Errors
    ///
    /// Fails on the first unparsable value.
    pub fn apply(&self, mut config: SessionConfig) -> Result<SessionConfig, ConfigError> {
        if let Some(strict) = self.bool(vars::STRICT)? {
            config.strict = strict;
        }
        if let Some(raw) = self.get(vars::ECHO) {
            config.echo = parse_echo(raw).ok_or_else(|| {
                let reason = format!("unknown echo target {raw:?}");
                ConfigError::invalid_value(self.var_name(vars::ECHO), reason)
            })?;
        }
        if let Some(size) = self.parse::<usize>(vars::READ_CHUNK)? {
            config = config.read_chunk_size(size);
        }
        if let Some(max) = self.parse::<usize>(vars::MAX_LINE_LEN)? {
            config = config.max_line_len(max);
        }
        if let Some(grace) = self.duration_millis(vars::KILL_GRACE_MS)? {
            config.kill_grace = grace;
        }
        if let Some(relay) = self.bool(vars::RELAY_STDIN)? {
            config.relay_stdin = relay;
        }
        if let Some(raw) = self.bool(vars::RAW_MODE)? {
            config.raw_mode = raw;
        }
        if let Some(term) = self.get(vars::TERM) {
            config.term = term.to_string();
        }
        if let Some(cols) = self.parse::<u16>(vars::COLS)? {
            config.window_size.0 = cols;
        }
        if let Some(rows) = self.parse::<u16>(vars::ROWS)? {
            config.window_size.1 = rows;
        }
        if let Some(timeout) = self.duration_millis(vars::CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = timeout;
        }
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_echo(raw: &str) -> Option<EchoTarget> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "stdout" => Some(EchoTarget::Stdout),
        "stderr" => Some(EchoTarget::Stderr),
        "off" | "none" => Some(EchoTarget::Off),
        other => parse_bool(other).map(|on| if on { EchoTarget::Stdout } else { EchoTarget::Off }),
    }
}
