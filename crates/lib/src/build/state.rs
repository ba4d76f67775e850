//! Build phases and the type-level tokens that enforce their order.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildPhase {
  Init,
  BaseSelected,
  SourceCopied,
  DependenciesInstalled,
  MetadataDeclared,
  ImageReady,
}

impl fmt::Display for BuildPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BuildPhase::Init => "INIT",
      BuildPhase::BaseSelected => "BASE_SELECTED",
      BuildPhase::SourceCopied => "SOURCE_COPIED",
      BuildPhase::DependenciesInstalled => "DEPENDENCIES_INSTALLED",
      BuildPhase::MetadataDeclared => "METADATA_DECLARED",
      BuildPhase::ImageReady => "IMAGE_READY",
    };
    f.write_str(name)
  }
}

#[derive(Debug)]
pub struct BaseSelected;

#[derive(Debug)]
pub struct SourceCopied;

#[derive(Debug)]
pub struct DependenciesInstalled;

#[derive(Debug)]
pub struct MetadataDeclared;

mod sealed {
  pub trait Sealed {}

  impl Sealed for super::BaseSelected {}
  impl Sealed for super::SourceCopied {}
  impl Sealed for super::DependenciesInstalled {}
  impl Sealed for super::MetadataDeclared {}
}

pub trait Stage: sealed::Sealed {
  const PHASE: BuildPhase;
}

impl Stage for BaseSelected {
  const PHASE: BuildPhase = BuildPhase::BaseSelected;
}

impl Stage for SourceCopied {
  const PHASE: BuildPhase = BuildPhase::SourceCopied;
}

impl Stage for DependenciesInstalled {
  const PHASE: BuildPhase = BuildPhase::DependenciesInstalled;
}

impl Stage for MetadataDeclared {
  const PHASE: BuildPhase = BuildPhase::MetadataDeclared;
}

/// Stages that still accept filesystem changes (working directory, copies).
pub trait Mutable: Stage {}

impl Mutable for BaseSelected {}
impl Mutable for SourceCopied {}
impl Mutable for DependenciesInstalled {}

/// Stages a copy can run in, and the stage it leads to.
///
/// Copies after dependency installation keep the build installed.
pub trait CopyTarget: Mutable {
  type Next: Stage;
}

impl CopyTarget for BaseSelected {
  type Next = SourceCopied;
}

impl CopyTarget for SourceCopied {
  type Next = SourceCopied;
}

impl CopyTarget for DependenciesInstalled {
  type Next = DependenciesInstalled;
}

/// Stages that accept run metadata (exposed port, start command).
pub trait AcceptsMetadata: Stage {}

impl AcceptsMetadata for DependenciesInstalled {}
impl AcceptsMetadata for MetadataDeclared {}
