use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::BuildPhase;
use crate::image::{ImagePath, ImageRef, PathError};
use crate::store::StoreError;
use crate::util::hash::{DirHashError, HashError};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("unresolved base image `{reference}`: {reason}")]
  UnresolvedBaseImage { reference: ImageRef, reason: String },

  #[error("build context {path} is not accessible: {source}")]
  InvalidContext { path: PathBuf, source: io::Error },

  #[error("copy source not found: {}", .path.display())]
  MissingSource { path: PathBuf },

  #[error("copy source {} is outside the build context {}", .path.display(), .context.display())]
  SourceOutsideContext { path: PathBuf, context: PathBuf },

  #[error("dependency manifest {manifest} was not copied into the image by this build")]
  ManifestNotCopied { manifest: ImagePath },

  #[error("dependency resolution failed for {manifest}{}: {message}", exit_suffix(.code))]
  DependencyResolution {
    manifest: ImagePath,
    code: Option<i32>,
    message: String,
  },

  #[error("step `{step}` is not allowed in phase {phase}")]
  StepOutOfOrder { step: &'static str, phase: BuildPhase },

  #[error("build stopped in phase {phase}: exposed port and start command must be declared")]
  Incomplete { phase: BuildPhase },

  #[error("no start command declared")]
  MissingStartCommand,

  #[error("invalid port {0}: must be in 1..=65535")]
  InvalidPort(u16),

  #[error("invalid environment variable name `{0}`")]
  InvalidEnv(String),

  #[error("build cancelled")]
  Cancelled,

  #[error(transparent)]
  Path(#[from] PathError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("failed to encode layer definition: {0}")]
  Encode(#[from] HashError),

  #[error(transparent)]
  Io(#[from] io::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!(" (exit code {})", code),
    None => String::new(),
  }
}
