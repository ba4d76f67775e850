//! Container records: `containers/<id>.json`.

use std::path::PathBuf;

use super::{ImageStore, StoreError, read_json, write_json};
use crate::container::ContainerRecord;

impl ImageStore {
  pub fn container_record_path(&self, id: &str) -> PathBuf {
    self.containers_dir().join(format!("{}.json", id))
  }

  /// Lock file held by the process supervising a running container.
  pub fn container_lock_path(&self, id: &str) -> PathBuf {
    self.containers_dir().join(format!("{}.lock", id))
  }

  pub fn save_container(&self, record: &ContainerRecord) -> Result<(), StoreError> {
    write_json(&self.container_record_path(&record.id), record)
  }

  pub fn load_container(&self, id: &str) -> Result<Option<ContainerRecord>, StoreError> {
    let path = self.container_record_path(id);
    if !path.exists() {
      return Ok(None);
    }
    read_json(&path).map(Some)
  }

  /// All container records, newest first.
  pub fn list_containers(&self) -> Result<Vec<ContainerRecord>, StoreError> {
    let root = self.containers_dir();
    if !root.exists() {
      return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(&root).map_err(|source| StoreError::Read {
      path: root.clone(),
      source,
    })?;

    let mut records = Vec::new();
    for entry in entries.flatten() {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      records.push(read_json::<ContainerRecord>(&path)?);
    }

    records.sort_by(|a, b| b.created_at_unix.cmp(&a.created_at_unix).then(a.id.cmp(&b.id)));
    Ok(records)
  }

  pub fn remove_container(&self, id: &str) -> Result<(), StoreError> {
    for path in [self.container_record_path(id), self.container_lock_path(id)] {
      match std::fs::remove_file(&path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(StoreError::Write { path, source: e }),
        _ => {}
      }
    }
    Ok(())
  }
}
