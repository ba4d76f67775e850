use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{ImagePath, ImageRef};
use crate::util::hash::{ContentHash, Hashable, ObjectHash};

/// Runtime provided by a base image, e.g. `python` `3.10`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
  pub name: String,
  pub version: String,
}

/// Contents of a base image's `base.json`.
///
/// `installer` is the argv run by dependency installation. `${manifest}` is a
/// read-only copy of the manifest. `${target}` is the deps directory of the
/// new layer, and `${rootfs}` and `${workdir}` are the layer's root and working
/// directory. The installer runs in `${workdir}`; only what it writes inside
/// the layer becomes part of the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseConfig {
  pub runtime: RuntimeInfo,

  #[serde(default)]
  pub env: BTreeMap<String, String>,

  #[serde(default = "default_installer")]
  pub installer: Vec<String>,

  #[serde(default = "default_deps_dir")]
  pub deps_dir: String,
}

fn default_installer() -> Vec<String> {
  ["pip", "install", "--no-cache-dir", "--target", "${target}", "-r", "${manifest}"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_deps_dir() -> String {
  "/opt/deps".to_string()
}

/// A base image registered in the store.
#[derive(Debug, Clone)]
pub struct BaseImage {
  pub reference: ImageRef,
  pub config: BaseConfig,
  /// Directory holding `base.json` and `rootfs/`.
  pub dir: PathBuf,
  /// Content hash recorded when the base was added.
  pub digest: ContentHash,
}

impl BaseImage {
  pub fn rootfs(&self) -> PathBuf {
    self.dir.join("rootfs")
  }
}

/// What an image was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRecord {
  pub reference: ImageRef,
  pub digest: ContentHash,
  pub runtime: RuntimeInfo,
}

/// The process started when a container is created, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCommand {
  pub executable: String,
  pub args: Vec<String>,
}

impl StartCommand {
  pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
    Self {
      executable: executable.into(),
      args,
    }
  }

  /// Split an argv list into executable and arguments.
  ///
  /// Returns `None` for an empty list.
  pub fn from_argv(argv: Vec<String>) -> Option<Self> {
    let mut iter = argv.into_iter();
    let executable = iter.next()?;
    Some(Self::new(executable, iter.collect()))
  }

  pub fn argv(&self) -> Vec<&str> {
    std::iter::once(self.executable.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect()
  }
}

impl fmt::Display for StartCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.argv().join(" "))
  }
}

/// The build step a layer captures, with the content hash of its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayerStep {
  Copy {
    src: String,
    dest: ImagePath,
    content: ContentHash,
  },
  Install {
    manifest: ImagePath,
    content: ContentHash,
    installer: Vec<String>,
    deps_dir: ImagePath,
  },
}

impl LayerStep {
  pub fn describe(&self) -> String {
    match self {
      LayerStep::Copy { src, dest, .. } => format!("copy {} -> {}", src, dest),
      LayerStep::Install { manifest, .. } => format!("install {}", manifest),
    }
  }
}

/// Identity of a layer: its parent plus the step that produced it.
///
/// The first layer's parent is the base digest, so changing the base
/// invalidates every layer above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerKey {
  pub parent: String,
  pub step: LayerStep,
}

impl Hashable for LayerKey {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
  pub id: ObjectHash,
  pub step: LayerStep,
}

impl LayerRecord {
  pub fn describe(&self) -> String {
    self.step.describe()
  }
}

/// Everything that defines an image. Its hash is the image id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub base: BaseRecord,
  pub workdir: ImagePath,
  pub env: BTreeMap<String, String>,
  pub layers: Vec<LayerRecord>,
  pub exposed_port: Option<u16>,
  pub start_command: StartCommand,
}

impl Hashable for ImageConfig {}

/// A built image as stored in `images/<id>/image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
  pub id: ObjectHash,
  pub config: ImageConfig,
  pub created_at_unix: u64,
}

impl BuiltImage {
  pub fn exposed_port(&self) -> Option<u16> {
    self.config.exposed_port
  }

  pub fn start_command(&self) -> &StartCommand {
    &self.config.start_command
  }
}
