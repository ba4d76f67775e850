use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use tracing::{debug, info};

use super::BuildError;
use super::install::run_installer;
use super::state::{
  AcceptsMetadata, BaseSelected, BuildPhase, CopyTarget, DependenciesInstalled, MetadataDeclared, Mutable, SourceCopied,
  Stage,
};
use crate::image::{
  BaseImage, BaseRecord, BuiltImage, ImageConfig, ImagePath, ImageRef, LayerKey, LayerRecord, LayerStep, StartCommand,
};
use crate::lock::{FileLock, LockMode};
use crate::store::ImageStore;
use crate::store::marker::write_hashed_marker;
use crate::util::fs::{copy_file, copy_tree, list_files};
use crate::util::hash::{Hashable, ObjectHash, hash_file, hash_path};
use crate::util::template::render;

/// Result of a finished build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
  pub image: BuiltImage,
  pub tag: Option<ImageRef>,
  pub layers_built: usize,
  pub layers_cached: usize,
  /// The store already held an identical image.
  pub reused: bool,
}

/// A build in `INIT`: nothing is selected and nothing is staged yet.
#[derive(Debug)]
pub struct Sequencer {
  store: ImageStore,
  context_dir: PathBuf,
  tag: Option<ImageRef>,
}

impl Sequencer {
  /// Start a build whose copy sources are resolved against `context_dir`.
  pub fn new(store: ImageStore, context_dir: &Path) -> Result<Self, BuildError> {
    let context_dir = dunce::canonicalize(context_dir).map_err(|source| BuildError::InvalidContext {
      path: context_dir.to_path_buf(),
      source,
    })?;
    Ok(Self {
      store,
      context_dir,
      tag: None,
    })
  }

  /// Tag to point at the image once the build succeeds.
  pub fn with_tag(mut self, tag: ImageRef) -> Self {
    self.tag = Some(tag);
    self
  }

  pub fn phase(&self) -> BuildPhase {
    BuildPhase::Init
  }

  /// Resolve the base image and stage its root filesystem as the image root.
  ///
  /// When `runtime` is given the base must provide that runtime.
  pub fn select_base(
    self,
    reference: &ImageRef,
    runtime: Option<&str>,
  ) -> Result<ImageBuilder<BaseSelected>, BuildError> {
    let lock = self.store.lock(LockMode::Shared, "build")?;

    let base = self
      .store
      .resolve_base(reference)?
      .ok_or_else(|| BuildError::UnresolvedBaseImage {
        reference: reference.clone(),
        reason: "not found in store (register it with `kiln base add`)".to_string(),
      })?;

    if let Some(wanted) = runtime
      && base.config.runtime.name != wanted
    {
      return Err(BuildError::UnresolvedBaseImage {
        reference: reference.clone(),
        reason: format!(
          "provides runtime {} {}, not {}",
          base.config.runtime.name, base.config.runtime.version, wanted
        ),
      });
    }

    let staging = self.store.staging_dir("build-")?;
    let rootfs = staging.path().join("rootfs");
    copy_tree(&base.rootfs(), &rootfs)?;

    info!(base = %reference, digest = %base.digest, "base selected");

    let env = base.config.env.clone();
    Ok(ImageBuilder {
      ctx: BuildContext {
        store: self.store,
        context_dir: self.context_dir,
        tag: self.tag,
        staging,
        _lock: lock,
        base,
        workdir: ImagePath::root(),
        env,
        layers: Vec::new(),
        staged_layers: Vec::new(),
        copied: BTreeSet::new(),
        exposed_port: None,
        start_command: None,
        layers_cached: 0,
      },
      _stage: PhantomData,
    })
  }
}

#[derive(Debug)]
struct BuildContext {
  store: ImageStore,
  context_dir: PathBuf,
  tag: Option<ImageRef>,
  /// `rootfs/` is the image root, `layers/<id>/` holds layers built by this
  /// run, `scratch/` is installer scratch space.
  staging: TempDir,
  _lock: FileLock,
  base: BaseImage,
  workdir: ImagePath,
  env: BTreeMap<String, String>,
  layers: Vec<LayerRecord>,
  staged_layers: Vec<ObjectHash>,
  copied: BTreeSet<ImagePath>,
  exposed_port: Option<u16>,
  start_command: Option<StartCommand>,
  layers_cached: usize,
}

impl BuildContext {
  fn rootfs(&self) -> PathBuf {
    self.staging.path().join("rootfs")
  }

  fn staged_layer_dir(&self, id: &ObjectHash) -> PathBuf {
    self.staging.path().join("layers").join(&id.0)
  }

  /// Id of the topmost layer, or the base digest for the first layer.
  fn parent(&self) -> String {
    match self.layers.last() {
      Some(layer) => layer.id.0.clone(),
      None => self.base.digest.0.clone(),
    }
  }

  fn layer_id(&self, step: &LayerStep) -> Result<ObjectHash, BuildError> {
    let key = LayerKey {
      parent: self.parent(),
      step: step.clone(),
    };
    Ok(key.compute_hash()?)
  }

  /// Apply a cached layer to the image root. Returns `false` on a miss.
  fn apply_cached(&mut self, id: &ObjectHash, step: &LayerStep) -> Result<bool, BuildError> {
    let Some(dir) = self.store.cached_layer(id)? else {
      return Ok(false);
    };
    copy_tree(&dir.join("fs"), &self.rootfs())?;
    info!(layer = %id, step = %step.describe(), "layer cache hit");
    self.layers_cached += 1;
    self.layers.push(LayerRecord {
      id: id.clone(),
      step: step.clone(),
    });
    Ok(true)
  }

  /// Seal a layer staged in `staged_layer_dir(id)` and apply it.
  fn apply_built(&mut self, id: &ObjectHash, step: &LayerStep) -> Result<(), BuildError> {
    let dir = self.staged_layer_dir(id);
    write_hashed_marker(&dir)?;
    copy_tree(&dir.join("fs"), &self.rootfs())?;
    info!(layer = %id, step = %step.describe(), "layer built");
    self.staged_layers.push(id.clone());
    self.layers.push(LayerRecord {
      id: id.clone(),
      step: step.clone(),
    });
    Ok(())
  }
}

/// An in-progress build. `S` is the current phase.
#[derive(Debug)]
pub struct ImageBuilder<S> {
  ctx: BuildContext,
  _stage: PhantomData<S>,
}

impl<S: Stage> ImageBuilder<S> {
  pub fn phase(&self) -> BuildPhase {
    S::PHASE
  }

  pub fn workdir(&self) -> &ImagePath {
    &self.ctx.workdir
  }

  pub fn base(&self) -> &BaseImage {
    &self.ctx.base
  }

  fn transition<T: Stage>(self) -> ImageBuilder<T> {
    debug!(from = %S::PHASE, to = %T::PHASE, "build phase");
    ImageBuilder {
      ctx: self.ctx,
      _stage: PhantomData,
    }
  }

  /// Record an environment variable for the started process.
  pub fn set_env(mut self, key: &str, value: &str) -> Result<Self, BuildError> {
    if key.is_empty() || key.contains('=') || key.contains('\0') {
      return Err(BuildError::InvalidEnv(key.to_string()));
    }
    self.ctx.env.insert(key.to_string(), value.to_string());
    Ok(self)
  }
}

impl<S: Mutable> ImageBuilder<S> {
  /// Change the working directory inside the image, creating it.
  ///
  /// Relative paths resolve against the current working directory.
  pub fn set_working_directory(mut self, path: &str) -> Result<Self, BuildError> {
    let workdir = self.ctx.workdir.resolve(path)?;
    std::fs::create_dir_all(workdir.on_host(&self.ctx.rootfs()))?;
    debug!(workdir = %workdir, "working directory set");
    self.ctx.workdir = workdir;
    Ok(self)
  }
}

impl<S: CopyTarget> ImageBuilder<S> {
  /// Copy `src` from the build context to `dest` in the image.
  ///
  /// `dest` names a directory to copy into when it is `.`, ends with `/`, or
  /// is an existing directory in the image; a directory source always has
  /// its contents copied into `dest`. Relative destinations resolve against
  /// the working directory.
  pub fn copy_into_image(mut self, src: &str, dest: &str) -> Result<ImageBuilder<S::Next>, BuildError> {
    let ctx = &mut self.ctx;
    let host_src = ctx.context_dir.join(src);
    if std::fs::symlink_metadata(&host_src).is_err() {
      return Err(BuildError::MissingSource { path: host_src });
    }

    let source = dunce::canonicalize(&host_src).map_err(|_| BuildError::MissingSource { path: host_src.clone() })?;
    if !source.starts_with(&ctx.context_dir) {
      return Err(BuildError::SourceOutsideContext {
        path: host_src,
        context: ctx.context_dir.clone(),
      });
    }

    let dest_path = ctx.workdir.resolve(dest)?;
    let is_dir = source.is_dir();
    let into_dir =
      dest == "." || dest.ends_with('/') || dest_path.is_root() || dest_path.on_host(&ctx.rootfs()).is_dir();
    let target = if is_dir || !into_dir {
      dest_path
    } else {
      let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BuildError::MissingSource { path: host_src.clone() })?;
      dest_path.join(&name)?
    };

    let rel_src = source
      .strip_prefix(&ctx.context_dir)
      .unwrap_or(&source)
      .to_string_lossy()
      .replace('\\', "/");

    let step = LayerStep::Copy {
      src: if rel_src.is_empty() { ".".to_string() } else { rel_src },
      dest: target.clone(),
      content: hash_path(&source)?,
    };
    let id = ctx.layer_id(&step)?;

    if !ctx.apply_cached(&id, &step)? {
      let fs_root = ctx.staged_layer_dir(&id).join("fs");
      let host_target = target.on_host(&fs_root);
      if is_dir {
        copy_tree(&source, &host_target)?;
      } else {
        copy_file(&source, &host_target)?;
      }
      ctx.apply_built(&id, &step)?;
    }

    if is_dir {
      for rel in list_files(&source)? {
        let rel = rel.to_string_lossy().replace('\\', "/");
        ctx.copied.insert(target.resolve(&rel)?);
      }
    } else {
      ctx.copied.insert(target);
    }

    Ok(self.transition())
  }
}

impl ImageBuilder<SourceCopied> {
  /// Run the base image's installer against a manifest copied by this build.
  ///
  /// Installed packages land in the base's deps directory as a new layer.
  pub async fn install_dependencies(mut self, manifest: &str) -> Result<ImageBuilder<DependenciesInstalled>, BuildError> {
    let ctx = &mut self.ctx;
    let manifest_path = ctx.workdir.resolve(manifest)?;
    if !ctx.copied.contains(&manifest_path) {
      return Err(BuildError::ManifestNotCopied {
        manifest: manifest_path,
      });
    }

    let rootfs = ctx.rootfs();
    let host_manifest = manifest_path.on_host(&rootfs);
    let deps_dir = ImagePath::parse_absolute(&ctx.base.config.deps_dir)?;

    let step = LayerStep::Install {
      manifest: manifest_path.clone(),
      content: hash_file(&host_manifest)?,
      installer: ctx.base.config.installer.clone(),
      deps_dir: deps_dir.clone(),
    };
    let id = ctx.layer_id(&step)?;

    if !ctx.apply_cached(&id, &step)? {
      // The installer writes only into the layer: cwd, `${rootfs}` and
      // `${workdir}` all point inside it, and the manifest is a read-only copy.
      let layer_root = ctx.staged_layer_dir(&id).join("fs");
      let target = deps_dir.on_host(&layer_root);
      let layer_workdir = ctx.workdir.on_host(&layer_root);
      std::fs::create_dir_all(&target)?;
      std::fs::create_dir_all(&layer_workdir)?;

      let scratch = ctx.staging.path().join("scratch");
      let manifest_copy = stage_manifest(&host_manifest, &scratch.join("manifests").join(&id.0))?;

      let mut vars = BTreeMap::new();
      vars.insert("manifest", manifest_copy.to_string_lossy().into_owned());
      vars.insert("target", target.to_string_lossy().into_owned());
      vars.insert("workdir", layer_workdir.to_string_lossy().into_owned());
      vars.insert("rootfs", layer_root.to_string_lossy().into_owned());

      let argv: Vec<String> = ctx.base.config.installer.iter().map(|arg| render(arg, &vars)).collect();
      let env: BTreeMap<String, String> = ctx.env.iter().map(|(k, v)| (k.clone(), render(v, &vars))).collect();

      run_installer(&argv, &env, &layer_workdir, &scratch, &manifest_path).await?;
      ctx.apply_built(&id, &step)?;
    }

    Ok(self.transition())
  }
}

/// Copy the manifest into `dir` and make the copy read-only.
fn stage_manifest(manifest: &Path, dir: &Path) -> Result<PathBuf, BuildError> {
  let name = manifest.file_name().unwrap_or_else(|| std::ffi::OsStr::new("manifest"));
  let copy = dir.join(name);
  copy_file(manifest, &copy)?;
  let mut permissions = std::fs::metadata(&copy)?.permissions();
  permissions.set_readonly(true);
  std::fs::set_permissions(&copy, permissions)?;
  Ok(copy)
}

impl<S: AcceptsMetadata> ImageBuilder<S> {
  /// Record the port the service listens on. Opens nothing.
  pub fn declare_exposed_port(mut self, port: u16) -> Result<ImageBuilder<MetadataDeclared>, BuildError> {
    if port == 0 {
      return Err(BuildError::InvalidPort(port));
    }
    self.ctx.exposed_port = Some(port);
    Ok(self.transition())
  }

  /// Fix the command containers run. Stored verbatim.
  pub fn declare_start_command(mut self, command: StartCommand) -> ImageBuilder<MetadataDeclared> {
    self.ctx.start_command = Some(command);
    self.transition()
  }
}

impl ImageBuilder<MetadataDeclared> {
  /// Commit staged layers, store the image and apply the tag.
  pub fn finish(self) -> Result<BuildOutcome, BuildError> {
    let ctx = self.ctx;
    let start_command = ctx.start_command.clone().ok_or(BuildError::MissingStartCommand)?;

    let config = ImageConfig {
      base: BaseRecord {
        reference: ctx.base.reference.clone(),
        digest: ctx.base.digest.clone(),
        runtime: ctx.base.config.runtime.clone(),
      },
      workdir: ctx.workdir.clone(),
      env: ctx.env.clone(),
      layers: ctx.layers.clone(),
      exposed_port: ctx.exposed_port,
      start_command,
    };
    let id = config.compute_hash()?;

    for layer in &ctx.staged_layers {
      ctx.store.commit_layer(&ctx.staged_layer_dir(layer), layer)?;
    }

    let (image, reused) = if ctx.store.has_image(&id) {
      (ctx.store.load_image(&id)?, true)
    } else {
      let image = BuiltImage {
        id: id.clone(),
        config,
        created_at_unix: SystemTime::now()
          .duration_since(UNIX_EPOCH)
          .map(|d| d.as_secs())
          .unwrap_or(0),
      };
      ctx.store.save_image(&image, &ctx.rootfs())?;
      (image, false)
    };

    if let Some(tag) = &ctx.tag {
      ctx.store.tag_image(tag, &id)?;
    }

    info!(
      image = %id,
      layers_built = ctx.staged_layers.len(),
      layers_cached = ctx.layers_cached,
      phase = %BuildPhase::ImageReady,
      "image ready"
    );

    Ok(BuildOutcome {
      image,
      tag: ctx.tag.clone(),
      layers_built: ctx.staged_layers.len(),
      layers_cached: ctx.layers_cached,
      reused,
    })
  }
}
