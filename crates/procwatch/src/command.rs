//! What to run and how.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::remote::SshTarget;
use crate::types::{Invocation, TransportKind};

/// Shell used for [`Invocation::Shell`].
pub const SHELL: &str = "/bin/sh";

/// A validated description of one command run.
///
/// # Example
///
/// ```
/// use procwatch::{CommandSpec, TransportKind};
///
/// let spec = CommandSpec::builder("dts devel run --verbose")
///     .transport(TransportKind::LocalPty)
///     .env("ROBOT", "autobot01")
///     .build()?;
/// assert_eq!(spec.argv()?, ["dts", "devel", "run", "--verbose"]);
/// # Ok::<(), procwatch::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    command_line: String,
    transport: TransportKind,
    invocation: Invocation,
    env: BTreeMap<String, String>,
    working_directory: Option<PathBuf>,
    inherit_env: bool,
    remote: Option<SshTarget>,
}

impl CommandSpec {
    /// A LOCAL_PIPE command with default settings.
    ///
    /// # Errors
    ///
    /// Fails if the command line is empty or cannot be split.
    pub fn new(command_line: impl Into<String>) -> Result<Self, ConfigError> {
        Self::builder(command_line).build()
    }

    /// Start building a command.
    pub fn builder(command_line: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder::new(command_line)
    }

    /// The command line as given.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The transport kind.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// How a local command line becomes a process.
    #[must_use]
    pub const fn invocation(&self) -> Invocation {
        self.invocation
    }

    /// Environment overrides.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Working directory for local transports.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Whether the child starts from the caller's environment.
    #[must_use]
    pub const fn inherit_env(&self) -> bool {
        self.inherit_env
    }

    /// The SSH target of a REMOTE_SHELL command.
    #[must_use]
    pub const fn remote(&self) -> Option<&SshTarget> {
        self.remote.as_ref()
    }

    /// Program and arguments for a local transport.
    ///
    /// # Errors
    ///
    /// Fails if the command line cannot be split into words.
    pub fn argv(&self) -> Result<Vec<String>, ConfigError> {
        match self.invocation {
            Invocation::Shell => Ok(vec![
                SHELL.to_string(),
                "-c".to_string(),
                self.command_line.clone(),
            ]),
            Invocation::Direct => split(&self.command_line),
        }
    }

    /// The command sent over SSH, with environment overrides exported first.
    #[must_use]
    pub fn remote_command(&self) -> String {
        let mut command = String::new();
        for (name, value) in &self.env {
            command.push_str("export ");
            command.push_str(name);
            command.push('=');
            command.push_str(&shell_words::quote(value));
            command.push_str("; ");
        }
        command.push_str(&self.command_line);
        command
    }
}

fn split(command_line: &str) -> Result<Vec<String>, ConfigError> {
    let words = shell_words::split(command_line).map_err(|e| ConfigError::InvalidCommand {
        command: command_line.to_string(),
        reason: e.to_string(),
    })?;
    if words.is_empty() {
        return Err(ConfigError::EmptyCommand);
    }
    Ok(words)
}

/// Builder for [`CommandSpec`].
#[derive(Debug, Clone)]
#[must_use]
pub struct CommandSpecBuilder {
    spec: CommandSpec,
}

impl CommandSpecBuilder {
    fn new(command_line: impl Into<String>) -> Self {
        Self {
            spec: CommandSpec {
                command_line: command_line.into(),
                transport: TransportKind::default(),
                invocation: Invocation::default(),
                env: BTreeMap::new(),
                working_directory: None,
                inherit_env: true,
                remote: None,
            },
        }
    }

    /// Select the transport.
    pub const fn transport(mut self, kind: TransportKind) -> Self {
        self.spec.transport = kind;
        self
    }

    /// Run on a pseudo-terminal.
    pub const fn pty(self) -> Self {
        self.transport(TransportKind::LocalPty)
    }

    /// Run on `target` over SSH.
    pub fn remote(mut self, target: SshTarget) -> Self {
        self.spec.transport = TransportKind::RemoteShell;
        self.spec.remote = Some(target);
        self
    }

    /// Choose direct execution or `/bin/sh -c`.
    pub const fn invocation(mut self, invocation: Invocation) -> Self {
        self.spec.invocation = invocation;
        self
    }

    /// Run the command line through `/bin/sh -c`.
    pub const fn shell(self) -> Self {
        self.invocation(Invocation::Shell)
    }

    /// Set one environment variable.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(name.into(), value.into());
        self
    }

    /// Set several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.spec
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory of a local command.
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.working_directory = Some(path.into());
        self
    }

    /// Start from an empty environment instead of the caller's.
    pub const fn inherit_env(mut self, inherit: bool) -> Self {
        self.spec.inherit_env = inherit;
        self
    }

    /// Validate and finish.
    ///
    /// # Errors
    ///
    /// Rejects empty command lines, unbalanced quoting for direct
    /// execution, environment names that cannot be passed to a process,
    /// and REMOTE_SHELL commands without a target.
    pub fn build(self) -> Result<CommandSpec, ConfigError> {
        let spec = self.spec;

        if spec.command_line.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        match spec.transport {
            TransportKind::RemoteShell => {
                if spec.remote.is_none() {
                    return Err(ConfigError::MissingRemoteTarget);
                }
            }
            TransportKind::LocalPipe | TransportKind::LocalPty => {
                spec.argv()?;
            }
        }

        for (name, value) in &spec.env {
            validate_env(name, value, spec.transport)?;
        }

        Ok(spec)
    }
}

fn validate_env(name: &str, value: &str, transport: TransportKind) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidEnvironment {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('=') {
        return Err(invalid("name contains '='"));
    }
    if name.contains('\0') || value.contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }
    if transport == TransportKind::RemoteShell && !is_shell_identifier(name) {
        return Err(invalid("name is not a shell identifier"));
    }
    Ok(())
}

fn is_shell_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let spec = CommandSpec::new("echo hi").unwrap();
        assert_eq!(spec.transport(), TransportKind::LocalPipe);
        assert_eq!(spec.invocation(), Invocation::Direct);
        assert!(spec.inherit_env());
        assert_eq!(spec.argv().unwrap(), ["echo", "hi"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(CommandSpec::new("   "), Err(ConfigError::EmptyCommand)));
        assert!(matches!(CommandSpec::new(""), Err(ConfigError::EmptyCommand)));
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let err = CommandSpec::new("echo 'unterminated").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCommand { .. }));
        assert!(CommandSpec::builder("echo 'x").shell().build().is_ok());
    }

    #[test]
    fn quoted_words_split() {
        let spec = CommandSpec::new(r#"printf "%s\n" 'a b'"#).unwrap();
        assert_eq!(spec.argv().unwrap(), ["printf", "%s\\n", "a b"]);
    }

    #[test]
    fn shell_invocation_argv() {
        let spec = CommandSpec::builder("echo a | tr a b").shell().build().unwrap();
        assert_eq!(spec.argv().unwrap(), ["/bin/sh", "-c", "echo a | tr a b"]);
    }

    #[test]
    fn remote_requires_target() {
        let err = CommandSpec::builder("uptime")
            .transport(TransportKind::RemoteShell)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRemoteTarget));
    }

    #[test]
    fn remote_command_exports_env() {
        let spec = CommandSpec::builder("run-bench")
            .remote(SshTarget::new("robot"))
            .env("ROBOT_NAME", "it's me")
            .env("A", "1")
            .build()
            .unwrap();
        assert_eq!(
            spec.remote_command(),
            "export A=1; export ROBOT_NAME='it'\\''s me'; run-bench"
        );
    }

    #[test]
    fn bad_env_names() {
        let eq = CommandSpec::builder("true").env("A=B", "x").build();
        assert!(matches!(eq, Err(ConfigError::InvalidEnvironment { .. })));

        let nul = CommandSpec::builder("true").env("A", "x\0y").build();
        assert!(matches!(nul, Err(ConfigError::InvalidEnvironment { .. })));

        let remote = CommandSpec::builder("true")
            .remote(SshTarget::new("h"))
            .env("1BAD", "x")
            .build();
        assert!(matches!(remote, Err(ConfigError::InvalidEnvironment { .. })));
    }
}
