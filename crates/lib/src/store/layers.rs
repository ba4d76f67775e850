//! Layer cache: `layers/<id>/{fs/,.kiln-complete}`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::marker::{is_complete, verify};
use super::{ImageStore, StoreError, install_dir};
use crate::util::hash::ObjectHash;

impl ImageStore {
  pub fn layer_dir(&self, id: &ObjectHash) -> PathBuf {
    self.layers_dir().join(&id.0)
  }

  /// A verified cached layer, if present.
  ///
  /// Incomplete or corrupted entries are removed so the step is rebuilt.
  pub fn cached_layer(&self, id: &ObjectHash) -> Result<Option<PathBuf>, StoreError> {
    let dir = self.layer_dir(id);
    if !dir.exists() {
      return Ok(None);
    }

    if verify(&dir) {
      return Ok(Some(dir));
    }

    warn!(layer = %id, "discarding invalid cached layer");
    std::fs::remove_dir_all(&dir).map_err(|source| StoreError::Write { path: dir, source })?;
    Ok(None)
  }

  /// Move a staged layer into the cache.
  ///
  /// If another build committed the same layer first, the staged copy is
  /// dropped; both have identical content by construction.
  pub fn commit_layer(&self, staged: &Path, id: &ObjectHash) -> Result<PathBuf, StoreError> {
    let dir = self.layer_dir(id);
    if is_complete(&dir) {
      debug!(layer = %id, "layer already committed");
      return Ok(dir);
    }
    install_dir(staged, &dir)?;
    debug!(layer = %id, "layer committed");
    Ok(dir)
  }

  pub fn list_layers(&self) -> Result<Vec<ObjectHash>, StoreError> {
    let root = self.layers_dir();
    if !root.exists() {
      return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(&root).map_err(|source| StoreError::Read {
      path: root.clone(),
      source,
    })?;

    let mut ids: Vec<ObjectHash> = entries
      .flatten()
      .filter(|e| e.path().is_dir())
      .filter_map(|e| e.file_name().to_str().map(|s| ObjectHash(s.to_string())))
      .collect();
    ids.sort();
    Ok(ids)
  }
}
