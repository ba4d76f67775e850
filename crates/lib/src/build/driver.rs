//! Replays a descriptor's steps through the typed builder.

use std::future::Future;
use std::path::PathBuf;

use tracing::{debug, info};

use super::state::{BaseSelected, BuildPhase, DependenciesInstalled, MetadataDeclared, SourceCopied};
use super::{BuildError, BuildOutcome, ImageBuilder, Sequencer};
use crate::descriptor::{Descriptor, Step};
use crate::image::ImageRef;
use crate::store::ImageStore;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Directory copy sources are resolved against. Defaults to the
  /// descriptor's directory.
  pub context_dir: Option<PathBuf>,
  /// Overrides the descriptor's tag.
  pub tag: Option<ImageRef>,
}

/// A builder in whichever phase the steps so far have reached.
enum Pipeline {
  BaseSelected(ImageBuilder<BaseSelected>),
  SourceCopied(ImageBuilder<SourceCopied>),
  DependenciesInstalled(ImageBuilder<DependenciesInstalled>),
  MetadataDeclared(ImageBuilder<MetadataDeclared>),
}

impl Pipeline {
  fn phase(&self) -> BuildPhase {
    match self {
      Pipeline::BaseSelected(_) => BuildPhase::BaseSelected,
      Pipeline::SourceCopied(_) => BuildPhase::SourceCopied,
      Pipeline::DependenciesInstalled(_) => BuildPhase::DependenciesInstalled,
      Pipeline::MetadataDeclared(_) => BuildPhase::MetadataDeclared,
    }
  }

  async fn apply(self, step: &Step) -> Result<Self, BuildError> {
    use Pipeline as P;

    let out_of_order = |phase| BuildError::StepOutOfOrder {
      step: step.name(),
      phase,
    };

    let next = match (self, step) {
      (P::BaseSelected(b), Step::Workdir(path)) => P::BaseSelected(b.set_working_directory(path)?),
      (P::SourceCopied(b), Step::Workdir(path)) => P::SourceCopied(b.set_working_directory(path)?),
      (P::DependenciesInstalled(b), Step::Workdir(path)) => P::DependenciesInstalled(b.set_working_directory(path)?),

      (P::BaseSelected(b), Step::Copy { src, dest }) => P::SourceCopied(b.copy_into_image(src, dest)?),
      (P::SourceCopied(b), Step::Copy { src, dest }) => P::SourceCopied(b.copy_into_image(src, dest)?),
      (P::DependenciesInstalled(b), Step::Copy { src, dest }) => {
        P::DependenciesInstalled(b.copy_into_image(src, dest)?)
      }

      (P::SourceCopied(b), Step::Install { manifest }) => {
        P::DependenciesInstalled(b.install_dependencies(manifest).await?)
      }

      (P::BaseSelected(b), Step::Env { key, value }) => P::BaseSelected(b.set_env(key, value)?),
      (P::SourceCopied(b), Step::Env { key, value }) => P::SourceCopied(b.set_env(key, value)?),
      (P::DependenciesInstalled(b), Step::Env { key, value }) => P::DependenciesInstalled(b.set_env(key, value)?),
      (P::MetadataDeclared(b), Step::Env { key, value }) => P::MetadataDeclared(b.set_env(key, value)?),

      (P::DependenciesInstalled(b), Step::Expose(port)) => P::MetadataDeclared(b.declare_exposed_port(*port)?),
      (P::MetadataDeclared(b), Step::Expose(port)) => P::MetadataDeclared(b.declare_exposed_port(*port)?),

      (P::DependenciesInstalled(b), Step::Cmd(cmd)) => P::MetadataDeclared(b.declare_start_command(cmd.clone())),
      (P::MetadataDeclared(b), Step::Cmd(cmd)) => P::MetadataDeclared(b.declare_start_command(cmd.clone())),

      (pipeline, _) => return Err(out_of_order(pipeline.phase())),
    };

    Ok(next)
  }
}

/// Build the image a descriptor describes.
pub async fn build(store: &ImageStore, descriptor: &Descriptor, options: BuildOptions) -> Result<BuildOutcome, BuildError> {
  let context_dir = options.context_dir.unwrap_or_else(|| descriptor.dir.clone());
  let mut sequencer = Sequencer::new(store.clone(), &context_dir)?;
  if let Some(tag) = options.tag.or_else(|| descriptor.tag.clone()) {
    sequencer = sequencer.with_tag(tag);
  }

  info!(descriptor = %descriptor.path.display(), base = %descriptor.base, "starting build");

  let mut pipeline = Pipeline::BaseSelected(sequencer.select_base(&descriptor.base, descriptor.runtime.as_deref())?);
  for (index, step) in descriptor.steps.iter().enumerate() {
    debug!(step = index + 1, op = step.name(), phase = %pipeline.phase(), "applying step");
    pipeline = pipeline.apply(step).await?;
  }

  match pipeline {
    Pipeline::MetadataDeclared(builder) => builder.finish(),
    other => Err(BuildError::Incomplete { phase: other.phase() }),
  }
}

/// Like [`build`], but abandons the build when `cancel` completes.
///
/// Dropping the build future drops its staging directory and kills a running
/// installer, so nothing partial is left in the store.
pub async fn build_until<F>(
  store: &ImageStore,
  descriptor: &Descriptor,
  options: BuildOptions,
  cancel: F,
) -> Result<BuildOutcome, BuildError>
where
  F: Future<Output = ()>,
{
  tokio::select! {
    biased;
    _ = cancel => Err(BuildError::Cancelled),
    result = build(store, descriptor, options) => result,
  }
}
