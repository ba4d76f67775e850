//! Container instances.
//!
//! A container is a host process running an image's start command from the
//! image's root filesystem:
//!
//! ```text
//! CREATED -> RUNNING -> EXITED | CRASHED
//! ```
//!
//! While running, the supervising process holds two locks: the port lease
//! `<store>/ports/<port>.lock` for the image's declared port and
//! `<store>/containers/<id>.lock`. Both are released when the process exits
//! or the supervisor goes away, so a crashed supervisor never leaks a port.

mod port;
mod record;
mod runtime;

pub use port::PortLease;
pub use record::{ContainerRecord, ContainerState, RunOptions};
pub use runtime::{Container, RunningContainer, refresh};

use std::io;

use thiserror::Error;

use crate::lock::LockError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RunError {
  #[error("port {port} is unavailable: {reason}")]
  PortBindFailure { port: u16, reason: String },

  #[error("failed to start `{command}`: {source}")]
  Spawn { command: String, source: io::Error },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Io(#[from] io::Error),
}
