//! The kiln store.
//!
//! Content-addressed storage for everything a build produces and everything
//! a container needs to start.
//!
//! # Layout
//!
//! ```text
//! <store>/
//! ├── .lock                  # shared by builds, exclusive for gc
//! ├── bases/<name>/<tag>/    # base.json + rootfs/ + .kiln-complete
//! ├── layers/<id>/           # fs/ + .kiln-complete (with output hash)
//! ├── images/<id>/           # image.json + rootfs/ + .kiln-complete
//! ├── tags/<name>/<tag>      # file containing an image id
//! ├── containers/<id>.json   # container records (+ <id>.lock while running)
//! ├── ports/<port>.lock      # port leases held by running containers
//! └── tmp/                   # staging for in-progress work
//! ```
//!
//! Entries are staged under `tmp/` and renamed into place once complete, so a
//! reader never observes a half-written layer or image.

mod bases;
mod containers;
mod images;
mod layers;
pub mod marker;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::image::ReferenceError;
use crate::lock::{FileLock, LockError, LockMode};
use crate::platform::paths::store_dir;
use crate::util::hash::DirHashError;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create {path}: {source}")]
  CreateDir { path: PathBuf, source: io::Error },

  #[error("failed to read {path}: {source}")]
  Read { path: PathBuf, source: io::Error },

  #[error("failed to write {path}: {source}")]
  Write { path: PathBuf, source: io::Error },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid base image at {path}: {message}")]
  InvalidBase { path: PathBuf, message: String },

  #[error("image not found: {0}")]
  ImageNotFound(String),

  #[error("image reference `{query}` matches {count} images")]
  AmbiguousImage { query: String, count: usize },

  #[error(transparent)]
  Reference(#[from] ReferenceError),

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error(transparent)]
  Lock(#[from] LockError),
}

/// Handle to a store directory. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStore {
  root: PathBuf,
}

impl ImageStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The store at `$KILN_STORE` or the default data location.
  pub fn default_store() -> Self {
    Self::new(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn bases_dir(&self) -> PathBuf {
    self.root.join("bases")
  }

  pub fn layers_dir(&self) -> PathBuf {
    self.root.join("layers")
  }

  pub fn images_dir(&self) -> PathBuf {
    self.root.join("images")
  }

  pub fn tags_dir(&self) -> PathBuf {
    self.root.join("tags")
  }

  pub fn containers_dir(&self) -> PathBuf {
    self.root.join("containers")
  }

  pub fn ports_dir(&self) -> PathBuf {
    self.root.join("ports")
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  /// Take the store-wide lock.
  pub fn lock(&self, mode: LockMode, command: &str) -> Result<FileLock, StoreError> {
    create_dir(&self.root)?;
    Ok(FileLock::acquire_store(&self.root, mode, command)?)
  }

  /// A fresh staging directory under `tmp/`, removed on drop.
  pub fn staging_dir(&self, prefix: &str) -> Result<tempfile::TempDir, StoreError> {
    let tmp = self.tmp_dir();
    create_dir(&tmp)?;
    tempfile::Builder::new()
      .prefix(prefix)
      .tempdir_in(&tmp)
      .map_err(|source| StoreError::CreateDir { path: tmp, source })
  }
}

pub(crate) fn create_dir(path: &Path) -> Result<(), StoreError> {
  std::fs::create_dir_all(path).map_err(|source| StoreError::CreateDir {
    path: path.to_path_buf(),
    source,
  })
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
  let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|e| StoreError::Parse {
    path: path.to_path_buf(),
    message: e.to_string(),
  })
}

pub(crate) fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  let content = serde_json::to_string_pretty(value).map_err(|e| StoreError::Write {
    path: path.to_path_buf(),
    source: io::Error::other(e),
  })?;
  crate::util::fs::write_atomic(path, content.as_bytes()).map_err(|source| StoreError::Write {
    path: path.to_path_buf(),
    source,
  })
}

/// Move a completed staging directory to its final location.
///
/// An existing entry at `dest` is replaced.
pub(crate) fn install_dir(staged: &Path, dest: &Path) -> Result<(), StoreError> {
  if let Some(parent) = dest.parent() {
    create_dir(parent)?;
  }
  if dest.exists() {
    std::fs::remove_dir_all(dest).map_err(|source| StoreError::Write {
      path: dest.to_path_buf(),
      source,
    })?;
  }
  std::fs::rename(staged, dest).map_err(|source| StoreError::Write {
    path: dest.to_path_buf(),
    source,
  })
}
