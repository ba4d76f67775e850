use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
  #[error("path `{0}` escapes the image root")]
  EscapesRoot(String),

  #[error("path `{0}` must be absolute")]
  NotAbsolute(String),
}

/// An absolute, normalized path inside an image filesystem.
///
/// Always starts with `/`, uses `/` separators, and never contains `.`, `..`
/// or empty segments. The root is `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImagePath(String);

impl ImagePath {
  pub fn root() -> Self {
    Self("/".to_string())
  }

  /// Parse an absolute image path such as `/app`.
  pub fn parse_absolute(path: &str) -> Result<Self, PathError> {
    if !path.starts_with('/') {
      return Err(PathError::NotAbsolute(path.to_string()));
    }
    Self::root().resolve(path)
  }

  /// Resolve `path` against `self` the way a shell resolves `cd`.
  ///
  /// Absolute paths replace `self`; `..` above the root is an error.
  pub fn resolve(&self, path: &str) -> Result<Self, PathError> {
    let mut segments: Vec<&str> = if path.starts_with('/') {
      Vec::new()
    } else {
      self.segments().collect()
    };

    for seg in path.split('/') {
      match seg {
        "" | "." => {}
        ".." => {
          if segments.pop().is_none() {
            return Err(PathError::EscapesRoot(path.to_string()));
          }
        }
        other => segments.push(other),
      }
    }

    Ok(Self(format!("/{}", segments.join("/"))))
  }

  pub fn join(&self, segment: &str) -> Result<Self, PathError> {
    self.resolve(segment.trim_start_matches('/'))
  }

  pub fn segments(&self) -> impl Iterator<Item = &str> {
    self.0.split('/').filter(|s| !s.is_empty())
  }

  pub fn is_root(&self) -> bool {
    self.0 == "/"
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Location of this path below an image root on the host.
  pub fn on_host(&self, root: &Path) -> PathBuf {
    let mut host = root.to_path_buf();
    host.extend(self.segments());
    host
  }
}

impl fmt::Display for ImagePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
