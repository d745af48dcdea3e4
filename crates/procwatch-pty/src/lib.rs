//! procwatch-pty: Unix pseudo-terminal and process-group primitives.
//!
//! This crate provides the low-level pieces procwatch uses to run a command
//! on a pseudo-terminal and to stop it together with everything it spawned.
//!
//! # Quick Start
//!
//! ```ignore
//! use procwatch_pty::{PtyConfig, PtySignal};
//! use tokio::io::AsyncReadExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PtyConfig::default();
//!     let (mut master, mut child) = procwatch_pty::spawn("sh", ["-c", "echo hi"], &config)?;
//!
//!     let mut buf = [0u8; 1024];
//!     let n = master.read(&mut buf).await?;
//!     println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//!     child.signal_group(PtySignal::Terminate)?;
//!     child.wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod status;

#[cfg(unix)]
pub mod unix;

pub use config::{PtyConfig, PtyConfigBuilder, PtySignal, WindowSize};
pub use error::{PtyError, Result};
pub use status::ExitStatus;

#[cfg(unix)]
pub use unix::{
    UnixPtyChild, UnixPtyMaster, WindowWatcher, signal_process_group, spawn, spawn_child,
};
