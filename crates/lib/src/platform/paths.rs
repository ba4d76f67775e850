//! Default locations for kiln data.
//!
//! The store lives under the user data directory unless `KILN_STORE` points
//! elsewhere. Tests and CI set `KILN_STORE` to an isolated temp directory.

use std::path::PathBuf;

use crate::consts::{APP_NAME, STORE_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .ok()
    .filter(|v| !v.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the store root: `$KILN_STORE`, else `<data_dir>/store`.
pub fn store_dir() -> PathBuf {
  match std::env::var(STORE_ENV) {
    Ok(path) if !path.is_empty() => PathBuf::from(path),
    _ => data_dir().join("store"),
  }
}
