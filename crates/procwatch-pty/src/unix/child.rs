//! Spawning and supervising a child attached to a PTY slave.

use std::ffi::OsStr;
use std::io;
use std::os::unix::io::OwnedFd;
use std::process::Stdio;

use rustix::process::{Pid, Signal, kill_process};
use tokio::process::{Child as TokioChild, Command};

use crate::config::{PtyConfig, PtySignal};
use crate::error::{PtyError, Result, errno_to_io};
use crate::status::ExitStatus;
use crate::unix::signals::signal_process_group;

/// A child process running on the slave end of a PTY.
///
/// The child leads its own process group (and, with a controlling
/// terminal, its own session), so [`signal_group`](Self::signal_group)
/// reaches any grandchildren it starts.
pub struct UnixPtyChild {
    child: TokioChild,
    pid: u32,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for UnixPtyChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPtyChild")
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

impl UnixPtyChild {
    fn new(child: TokioChild, program: &OsStr) -> Result<Self> {
        let pid = child.id().ok_or_else(|| PtyError::Spawn {
            program: program.to_string_lossy().into_owned(),
            source: io::Error::other("child exited before its pid was read"),
        })?;
        Ok(Self {
            child,
            pid,
            exit_status: None,
        })
    }

    /// The process ID, which is also the process group ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child has not been reaped yet.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Wait for the child to exit. The status is cached after the first reap.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = self.child.wait().await.map_err(PtyError::Wait)?;
        let status = ExitStatus::from_std(status);
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Poll for the exit status without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }

        let status = self.child.try_wait().map_err(PtyError::Wait)?;
        self.exit_status = status.map(ExitStatus::from_std);
        Ok(self.exit_status)
    }

    /// Send a signal to the child process only.
    pub fn signal(&self, signal: PtySignal) -> Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }

        let pid = Pid::from_raw(self.pid as i32).ok_or_else(|| {
            PtyError::Signal(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))
        })?;
        let signal = Signal::from_named_raw(signal.as_raw()).ok_or_else(|| {
            PtyError::Signal(io::Error::new(io::ErrorKind::InvalidInput, "invalid signal"))
        })?;

        kill_process(pid, signal).map_err(|e| PtyError::Signal(errno_to_io(e)))
    }

    /// Send a signal to the child's whole process group.
    pub fn signal_group(&self, signal: PtySignal) -> Result<()> {
        signal_process_group(self.pid, signal)
    }
}

/// Spawn `program` with the PTY slave as its standard streams.
///
/// With `session_leader` set the child calls `setsid` and adopts the
/// slave as its controlling terminal; otherwise it is only placed in a new
/// process group. `slave_fd` is consumed, so the parent keeps no slave
/// descriptor once this returns.
pub fn spawn_child<S, I>(
    slave_fd: OwnedFd,
    program: S,
    args: I,
    config: &PtyConfig,
) -> Result<UnixPtyChild>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
{
    let program = program.as_ref();
    let spawn_err = |source: io::Error| PtyError::Spawn {
        program: program.to_string_lossy().into_owned(),
        source,
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    if !config.inherit_env {
        cmd.env_clear();
    }
    cmd.envs(config.env.iter().map(|(k, v)| (k, v)));
    cmd.kill_on_drop(false);

    if let Some(ref dir) = config.cwd {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::from(slave_fd.try_clone().map_err(spawn_err)?));
    cmd.stdout(Stdio::from(slave_fd.try_clone().map_err(spawn_err)?));
    cmd.stderr(Stdio::from(slave_fd));

    if config.session_leader {
        // SAFETY: setsid and ioctl are async-signal-safe. By the time this
        // runs the slave has been dup2'ed onto fd 0.
        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    } else {
        cmd.process_group(0);
    }

    let child = cmd.spawn().map_err(spawn_err)?;
    tracing::debug!(
        program = %program.to_string_lossy(),
        pid = child.id(),
        session_leader = config.session_leader,
        "spawned child on pty"
    );

    UnixPtyChild::new(child, program)
}
