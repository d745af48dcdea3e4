//! The PTY pair and the async master end.

use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use rustix::fs::{Mode, OFlags, fcntl_setfl, open};
use rustix::pty::{OpenptFlags, grantpt, openpt, ptsname, unlockpt};
use rustix::termios::{Winsize, tcgetwinsize, tcsetwinsize};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::WindowSize;
use crate::error::{PtyError, Result, errno_to_io};

/// The master side of a pseudo-terminal, registered with Tokio.
///
/// Reads yield what the child writes to its terminal. When the last slave
/// descriptor closes Linux fails master reads with `EIO`; that is reported
/// as end-of-stream.
pub struct UnixPtyMaster {
    fd: AsyncFd<OwnedFd>,
    closed: bool,
}

impl std::fmt::Debug for UnixPtyMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPtyMaster")
            .field("fd", &self.fd.as_raw_fd())
            .field("closed", &self.closed)
            .finish()
    }
}

impl UnixPtyMaster {
    /// Allocate a PTY pair. Returns the master and the slave's device path.
    ///
    /// # Errors
    ///
    /// [`PtyError::Create`] if the pair cannot be allocated or registered.
    pub fn open() -> Result<(Self, PathBuf)> {
        let (master, slave) = allocate().map_err(|e| PtyError::Create(errno_to_io(e)))?;
        let fd = AsyncFd::new(master).map_err(PtyError::Create)?;
        Ok((Self { fd, closed: false }, slave))
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resize the terminal. The foreground group receives `SIGWINCH`.
    pub fn set_window_size(&self, size: WindowSize) -> Result<()> {
        self.ensure_open()?;
        let winsize = Winsize {
            ws_col: size.cols,
            ws_row: size.rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        tcsetwinsize(self.fd.get_ref(), winsize).map_err(|e| PtyError::Resize(errno_to_io(e)))
    }

    /// The current terminal size.
    pub fn window_size(&self) -> Result<WindowSize> {
        self.ensure_open()?;
        let ws = tcgetwinsize(self.fd.get_ref())?;
        Ok(WindowSize::new(ws.ws_col, ws.ws_row))
    }

    /// Stop using the master: reads report end-of-stream, writes fail. The
    /// descriptor is released on drop.
    pub fn close(&mut self) {
        self.closed = true;
    }

    const fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(PtyError::Closed)
        } else {
            Ok(())
        }
    }
}

fn allocate() -> rustix::io::Result<(OwnedFd, PathBuf)> {
    let master = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let name = ptsname(&master, Vec::new())?;
    fcntl_setfl(&master, OFlags::NONBLOCK)?;
    let slave = PathBuf::from(std::ffi::OsString::from_vec(name.into_bytes()));
    Ok((master, slave))
}

impl AsRawFd for UnixPtyMaster {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsyncRead for UnixPtyMaster {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|fd| rustix::io::read(fd.get_ref(), unfilled).map_err(errno_to_io)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                // Every slave descriptor is gone.
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Poll::Ready(Ok(())),
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => {}
            }
        }
    }
}

impl AsyncWrite for UnixPtyMaster {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pty master closed")));
        }
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            if let Ok(result) =
                guard.try_io(|fd| rustix::io::write(fd.get_ref(), buf).map_err(errno_to_io))
            {
                return Poll::Ready(result);
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().closed = true;
        Poll::Ready(Ok(()))
    }
}

/// Open the slave end at `path`, close-on-exec and without making it the
/// caller's controlling terminal.
pub fn open_slave(path: &Path) -> Result<OwnedFd> {
    open(path, OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC, Mode::empty())
        .map_err(|e| PtyError::Create(errno_to_io(e)))
}
