//! What a PTY child is started with, and the signals sent to it.

use std::ffi::OsString;
use std::path::PathBuf;

/// Default terminal width.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height.
pub const DEFAULT_ROWS: u16 = 24;

/// How to start a child on a pseudo-terminal.
///
/// ```
/// use procwatch_pty::{PtyConfig, WindowSize};
///
/// let config = PtyConfig::builder()
///     .clean_env()
///     .env("TERM", "vt100")
///     .window_size(120, 40)
///     .build();
/// assert_eq!(config.size, WindowSize::new(120, 40));
/// assert!(!config.inherit_env);
/// ```
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Directory the child starts in. `None` keeps the parent's.
    pub cwd: Option<PathBuf>,
    /// Start from the parent's environment before applying `env`.
    pub inherit_env: bool,
    /// Variables set in the child, applied in order.
    pub env: Vec<(OsString, OsString)>,
    /// Terminal geometry set before the child starts.
    pub size: WindowSize,
    /// Run the child as a session leader owning the slave as its
    /// controlling terminal. Otherwise it only gets a new process group.
    pub session_leader: bool,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            inherit_env: true,
            env: Vec::new(),
            size: WindowSize::default(),
            session_leader: true,
        }
    }
}

impl PtyConfig {
    /// A builder starting from the defaults.
    #[must_use]
    pub fn builder() -> PtyConfigBuilder {
        PtyConfigBuilder(Self::default())
    }
}

/// Builder for [`PtyConfig`].
#[derive(Debug, Clone, Default)]
pub struct PtyConfigBuilder(PtyConfig);

impl PtyConfigBuilder {
    /// Start the child in `dir`.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.0.cwd = Some(dir.into());
        self
    }

    /// Do not inherit the parent's environment.
    #[must_use]
    pub const fn clean_env(mut self) -> Self {
        self.0.inherit_env = false;
        self
    }

    /// Set one variable. Later settings of the same name win.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.0.env.push((key.into(), value.into()));
        self
    }

    /// Set several variables.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.0
            .env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Terminal geometry in columns and rows.
    #[must_use]
    pub const fn window_size(mut self, cols: u16, rows: u16) -> Self {
        self.0.size = WindowSize::new(cols, rows);
        self
    }

    /// See [`PtyConfig::session_leader`].
    #[must_use]
    pub const fn session_leader(mut self, value: bool) -> Self {
        self.0.session_leader = value;
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> PtyConfig {
        self.0
    }
}

/// Signals procwatch sends to a child's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PtySignal {
    /// Polite stop, `SIGTERM`.
    Terminate,
    /// Forced stop after the grace period, `SIGKILL`.
    Kill,
}

impl PtySignal {
    /// The raw signal number.
    #[cfg(unix)]
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

impl std::fmt::Display for PtySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        })
    }
}

/// Terminal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl WindowSize {
    /// `cols` by `rows`.
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}
