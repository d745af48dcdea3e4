//! Unix implementation: PTY pairs, children, and process-group signals.
//!
//! - PTY pairs come from `openpt`/`grantpt`/`unlockpt` via rustix.
//! - The master end is driven through tokio's `AsyncFd`.
//! - Children run as session leaders with the slave as controlling
//!   terminal, so signalling the group reaches shell-spawned grandchildren.

mod child;
mod pty;
mod signals;

use std::ffi::OsStr;

pub use child::{UnixPtyChild, spawn_child};
pub use pty::{UnixPtyMaster, open_slave};
pub use signals::{WindowWatcher, signal_process_group};

use crate::config::PtyConfig;
use crate::error::Result;

/// Allocate a PTY and spawn `program` on its slave end.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if PTY allocation fails or the program cannot be
/// executed (for example, it does not exist).
pub fn spawn<S, I>(program: S, args: I, config: &PtyConfig) -> Result<(UnixPtyMaster, UnixPtyChild)>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: AsRef<OsStr>,
{
    let (master, slave_path) = UnixPtyMaster::open()?;
    master.set_window_size(config.size)?;

    let slave_fd = open_slave(&slave_path)?;
    let child = spawn_child(slave_fd, program, args, config)?;

    Ok((master, child))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::config::PtySignal;
    use crate::error::PtyError;
    use crate::status::ExitStatus;

    async fn read_to_eof(master: &mut UnixPtyMaster) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = master.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn spawn_echo_and_reap() {
        let config = PtyConfig::default();
        let (mut master, mut child) = spawn("echo", ["hello"], &config).unwrap();

        let output = read_to_eof(&mut master).await;
        assert!(output.contains("hello"));
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(0));
        assert!(!child.is_running());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn child_is_group_leader() {
        let config = PtyConfig::default();
        let (mut master, mut child) =
            spawn("sh", ["-c", "cut -d' ' -f5 /proc/$$/stat"], &config).unwrap();

        let output = read_to_eof(&mut master).await;
        assert_eq!(output.trim(), child.pid().to_string());
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn environment_and_exit_code() {
        let config = PtyConfig::builder().env("PROCWATCH_PTY_TEST", "42").build();
        let (mut master, mut child) =
            spawn("sh", ["-c", "echo value=$PROCWATCH_PTY_TEST; exit 3"], &config).unwrap();

        assert!(read_to_eof(&mut master).await.contains("value=42"));
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(3));
    }

    #[tokio::test]
    async fn group_signal_terminates_child() {
        let config = PtyConfig::default();
        let (_master, mut child) = spawn("sleep", ["30"], &config).unwrap();

        child.signal_group(PtySignal::Terminate).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let config = PtyConfig::default();
        let err = spawn("procwatch-definitely-missing", std::iter::empty::<&str>(), &config)
            .unwrap_err();
        assert!(matches!(err, PtyError::Spawn { .. }));
    }
}
