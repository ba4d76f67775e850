use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_TAG;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
  #[error("image reference is empty")]
  Empty,

  #[error("invalid image name `{0}`: use lowercase letters, digits, '.', '_', '-' and '/' separators")]
  InvalidName(String),

  #[error("invalid image tag `{0}`: use letters, digits, '.', '_' and '-'")]
  InvalidTag(String),
}

/// A `name[:tag]` reference such as `python:3.10-slim`.
///
/// The tag is the part after the last `:` that follows the last `/`, so
/// `registry.local:5000/python` is a name without a tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
  name: String,
  tag: String,
}

impl ImageRef {
  pub fn new(name: &str, tag: &str) -> Result<Self, ReferenceError> {
    validate_name(name)?;
    validate_tag(tag)?;
    Ok(Self {
      name: name.to_string(),
      tag: tag.to_string(),
    })
  }

  pub fn parse(s: &str) -> Result<Self, ReferenceError> {
    let s = s.trim();
    if s.is_empty() {
      return Err(ReferenceError::Empty);
    }

    let slash = s.rfind('/').map(|i| i + 1).unwrap_or(0);
    match s[slash..].rfind(':') {
      Some(colon) => {
        let split = slash + colon;
        Self::new(&s[..split], &s[split + 1..])
      }
      None => Self::new(s, DEFAULT_TAG),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  /// Relative directory for this reference: `<name segments>/<tag>`.
  pub fn to_rel_path(&self) -> PathBuf {
    let mut path: PathBuf = self.name.split('/').collect();
    path.push(&self.tag);
    path
  }
}

fn validate_name(name: &str) -> Result<(), ReferenceError> {
  let valid_segment = |seg: &str| {
    !seg.is_empty()
      && seg != "."
      && seg != ".."
      && seg
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | ':'))
  };

  if name.is_empty() || !name.split('/').all(valid_segment) {
    return Err(ReferenceError::InvalidName(name.to_string()));
  }
  Ok(())
}

fn validate_tag(tag: &str) -> Result<(), ReferenceError> {
  let valid = !tag.is_empty()
    && tag.len() <= 128
    && !tag.starts_with('.')
    && tag.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

  if !valid {
    return Err(ReferenceError::InvalidTag(tag.to_string()));
  }
  Ok(())
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.name, self.tag)
  }
}

impl FromStr for ImageRef {
  type Err = ReferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl TryFrom<String> for ImageRef {
  type Error = ReferenceError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value)
  }
}

impl From<ImageRef> for String {
  fn from(value: ImageRef) -> Self {
    value.to_string()
  }
}
