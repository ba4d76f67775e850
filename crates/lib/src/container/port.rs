//! Port leases.
//!
//! Owning a port means holding `<store>/ports/<port>.lock` exclusively and
//! having been able to bind `0.0.0.0:<port>` when the lease was taken.

use std::net::{Ipv4Addr, TcpListener};

use tracing::debug;

use super::RunError;
use crate::lock::{FileLock, LockMode};
use crate::store::ImageStore;

#[derive(Debug)]
pub struct PortLease {
  port: u16,
  _lock: FileLock,
}

impl PortLease {
  /// Take the lease for `port` on behalf of `holder`.
  ///
  /// Fails with `PortBindFailure` when another container holds the lease or
  /// any other process is listening on the port.
  pub fn acquire(store: &ImageStore, port: u16, holder: &str) -> Result<Self, RunError> {
    let path = store.ports_dir().join(format!("{}.lock", port));
    let lock = FileLock::acquire(&path, LockMode::Exclusive, holder).map_err(|e| {
      if e.is_contention() {
        RunError::PortBindFailure {
          port,
          reason: e.to_string(),
        }
      } else {
        RunError::Lock(e)
      }
    })?;

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(|e| RunError::PortBindFailure {
      port,
      reason: format!("cannot bind 0.0.0.0:{}: {}", port, e),
    })?;
    drop(listener);

    debug!(port, holder, "port lease acquired");
    Ok(Self { port, _lock: lock })
  }

  pub fn port(&self) -> u16 {
    self.port
  }
}
