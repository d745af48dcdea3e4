//! Where and as whom a REMOTE_SHELL command runs.
//!
//! These types are plain data and are available without the `ssh` feature,
//! so configuration can be parsed and validated everywhere; connecting
//! requires the feature.

use std::fmt;
use std::path::PathBuf;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// An SSH authentication method.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Password authentication.
    Password(String),
    /// Public key authentication with a private key file.
    PrivateKey {
        /// Private key path.
        path: PathBuf,
        /// Passphrase for an encrypted key.
        passphrase: Option<String>,
    },
    /// Keys offered by the running SSH agent (`SSH_AUTH_SOCK`).
    Agent,
}

impl AuthMethod {
    /// Password authentication.
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    /// Private key authentication.
    #[must_use]
    pub fn private_key(path: impl Into<PathBuf>) -> Self {
        Self::PrivateKey {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::PrivateKey { .. } => "publickey",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// How the server's host key is checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// The key must already be listed in `known_hosts`.
    #[default]
    KnownHosts,
    /// Unknown hosts are accepted and appended to `known_hosts`; a changed
    /// key for a known host is still rejected.
    AcceptNew,
    /// The key's SHA-256 fingerprint must equal this value
    /// (`SHA256:...` as printed by `ssh-keygen -l`).
    Fingerprint(String),
}

/// An SSH destination plus the credentials to use there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    host: String,
    port: u16,
    user: String,
    auth: Vec<AuthMethod>,
    host_key: HostKeyPolicy,
    known_hosts: Option<PathBuf>,
}

impl SshTarget {
    /// Target `host` on port 22 as the current user.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: default_user(),
            auth: Vec::new(),
            host_key: HostKeyPolicy::default(),
            known_hosts: None,
        }
    }

    /// Parse `[user@]host[:port]`. A port that is not a number is kept as
    /// part of the host.
    #[must_use]
    pub fn parse(target: &str) -> Self {
        let (user, rest) = match target.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user), rest),
            _ => (None, target),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => port
                .parse()
                .map_or((rest, DEFAULT_SSH_PORT), |port| (host, port)),
            None => (rest, DEFAULT_SSH_PORT),
        };

        let mut parsed = Self::new(host).port(port);
        if let Some(user) = user {
            parsed = parsed.user(user);
        }
        parsed
    }

    /// Set the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Add an authentication method. Methods are tried in the order added.
    #[must_use]
    pub fn auth(mut self, method: AuthMethod) -> Self {
        self.auth.push(method);
        self
    }

    /// Add password authentication.
    #[must_use]
    pub fn password(self, password: impl Into<String>) -> Self {
        self.auth(AuthMethod::password(password))
    }

    /// Add private key authentication.
    #[must_use]
    pub fn private_key(self, path: impl Into<PathBuf>) -> Self {
        self.auth(AuthMethod::private_key(path))
    }

    /// Add private key authentication with a passphrase.
    #[must_use]
    pub fn private_key_with_passphrase(
        self,
        path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth(AuthMethod::PrivateKey {
            path: path.into(),
            passphrase: Some(passphrase.into()),
        })
    }

    /// Add SSH agent authentication.
    #[must_use]
    pub fn agent(self) -> Self {
        self.auth(AuthMethod::Agent)
    }

    /// Set the host key policy.
    #[must_use]
    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }

    /// Use a `known_hosts` file other than the default.
    #[must_use]
    pub fn known_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// The host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    #[must_use]
    pub const fn port_number(&self) -> u16 {
        self.port
    }

    /// The user name.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user
    }

    /// The host key policy.
    #[must_use]
    pub const fn host_key(&self) -> &HostKeyPolicy {
        &self.host_key
    }

    /// `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The methods to try. Without explicit methods: the agent, then
    /// `~/.ssh/id_ed25519`, then `~/.ssh/id_rsa`.
    #[must_use]
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        if !self.auth.is_empty() {
            return self.auth.clone();
        }
        let ssh_dir = home_dir().join(".ssh");
        vec![
            AuthMethod::Agent,
            AuthMethod::private_key(ssh_dir.join("id_ed25519")),
            AuthMethod::private_key(ssh_dir.join("id_rsa")),
        ]
    }

    /// The `known_hosts` file: the explicit one, then `$SSH_KNOWN_HOSTS`,
    /// then `~/.ssh/known_hosts`.
    #[must_use]
    pub fn known_hosts_path(&self) -> PathBuf {
        if let Some(path) = &self.known_hosts {
            return path.clone();
        }
        if let Some(path) = std::env::var_os("SSH_KNOWN_HOSTS") {
            return PathBuf::from(path);
        }
        home_dir().join(".ssh").join("known_hosts")
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from)
}
