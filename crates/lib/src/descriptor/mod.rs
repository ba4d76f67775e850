//! Build descriptors.
//!
//! A descriptor is a Lua file (`kiln.lua` by default) that names the base
//! image, the tag to apply and the ordered list of build steps:
//!
//! ```lua
//! return {
//!   tag = "minutes:latest",
//!   base = "python:3.10",
//!   runtime = "python",
//!   steps = {
//!     kiln.workdir("/app"),
//!     kiln.copy("requirements.txt", "."),
//!     kiln.install("requirements.txt"),
//!     kiln.copy("app.py", "."),
//!     kiln.expose(8502),
//!     kiln.cmd({ "streamlit", "run", "app.py", "--server.port=8502", "--server.address=0.0.0.0" }),
//!   },
//! }
//! ```

pub mod lua;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::image::{ImageRef, ReferenceError, StartCommand};

#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("failed to read descriptor {path}: {message}")]
  Read { path: PathBuf, message: String },

  #[error("descriptor evaluation failed: {0}")]
  Lua(String),

  #[error("invalid descriptor: {0}")]
  Invalid(String),

  #[error(transparent)]
  Reference(#[from] ReferenceError),
}

impl From<mlua::Error> for DescriptorError {
  fn from(err: mlua::Error) -> Self {
    DescriptorError::Lua(err.to_string())
  }
}

/// One declared build step, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
  Workdir(String),
  Copy { src: String, dest: String },
  Install { manifest: String },
  Env { key: String, value: String },
  Expose(u16),
  Cmd(StartCommand),
}

impl Step {
  pub fn name(&self) -> &'static str {
    match self {
      Step::Workdir(_) => "workdir",
      Step::Copy { .. } => "copy",
      Step::Install { .. } => "install",
      Step::Env { .. } => "env",
      Step::Expose(_) => "expose",
      Step::Cmd(_) => "cmd",
    }
  }
}

#[derive(Debug, Clone)]
pub struct Descriptor {
  /// Canonical path of the descriptor file.
  pub path: PathBuf,
  /// Directory containing the descriptor, the default build context.
  pub dir: PathBuf,
  pub tag: Option<ImageRef>,
  pub base: ImageRef,
  /// Runtime the base must provide, e.g. `python`.
  pub runtime: Option<String>,
  pub steps: Vec<Step>,
}

impl Descriptor {
  /// Evaluate the descriptor at `path`.
  pub fn load(path: &Path) -> Result<Self, DescriptorError> {
    lua::load_descriptor(path)
  }

  pub fn exposed_port(&self) -> Option<u16> {
    self.steps.iter().rev().find_map(|step| match step {
      Step::Expose(port) => Some(*port),
      _ => None,
    })
  }
}
