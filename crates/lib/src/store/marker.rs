//! Completion markers.
//!
//! A store entry is complete only once its `.kiln-complete` marker exists.
//! Layers record the hash of their content in the marker so a cache hit can
//! be verified before reuse.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StoreError;
use crate::consts::COMPLETE_MARKER;
use crate::util::hash::{ContentHash, hash_directory};

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMarker {
  pub version: u32,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output_hash: Option<String>,
}

/// Hash `dir` (minus the marker) and write the marker. Returns the hash.
pub fn write_hashed_marker(dir: &Path) -> Result<ContentHash, StoreError> {
  let hash = hash_directory(dir, &[COMPLETE_MARKER])?;
  write_marker(dir, Some(&hash))?;
  Ok(hash)
}

pub fn write_marker(dir: &Path, output_hash: Option<&ContentHash>) -> Result<(), StoreError> {
  let marker = CompleteMarker {
    version: MARKER_VERSION,
    status: "complete".to_string(),
    output_hash: output_hash.map(|h| h.0.clone()),
  };
  super::write_json(&dir.join(COMPLETE_MARKER), &marker)
}

/// `None` if the marker does not exist.
pub fn read_marker(dir: &Path) -> Result<Option<CompleteMarker>, StoreError> {
  let path = dir.join(COMPLETE_MARKER);
  if !path.exists() {
    return Ok(None);
  }
  super::read_json(&path).map(Some)
}

pub fn is_complete(dir: &Path) -> bool {
  matches!(read_marker(dir), Ok(Some(_)))
}

/// True if the marker exists and, when it carries a hash, the content still
/// matches it.
pub fn verify(dir: &Path) -> bool {
  let marker = match read_marker(dir) {
    Ok(Some(marker)) => marker,
    Ok(None) => {
      debug!(path = ?dir, "no completion marker");
      return false;
    }
    Err(e) => {
      debug!(path = ?dir, error = %e, "unreadable completion marker");
      return false;
    }
  };

  let Some(expected) = marker.output_hash else {
    return true;
  };

  match hash_directory(dir, &[COMPLETE_MARKER]) {
    Ok(actual) if actual.0 == expected => true,
    Ok(actual) => {
      warn!(path = ?dir, expected = %expected, actual = %actual, "store entry corrupted");
      false
    }
    Err(e) => {
      warn!(path = ?dir, error = %e, "failed to hash store entry");
      false
    }
  }
}
