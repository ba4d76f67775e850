//! Store garbage collection.
//!
//! Live roots are tagged images and images of containers that have not
//! finished. Everything else is swept:
//! - images with no tag and no live container
//! - layers no remaining image references
//! - records of exited and crashed containers
//! - staging leftovers under `tmp/`
//!
//! Collection holds the store lock exclusively, so it never runs while a
//! build is staging or committing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::container::{RunError, refresh};
use crate::lock::LockMode;
use crate::store::ImageStore;
use crate::store::marker::is_complete;
use crate::util::fs::dir_size;
use crate::util::hash::ObjectHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error(transparent)]
  Store(#[from] crate::store::StoreError),

  #[error(transparent)]
  Container(#[from] RunError),

  #[error("failed to read store directory: {0}")]
  ReadStore(#[from] io::Error),

  #[error("failed to delete {path}: {message}")]
  Delete { path: PathBuf, message: String },
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcStats {
  pub images_scanned: usize,
  pub images_deleted: usize,
  pub layers_scanned: usize,
  pub layers_deleted: usize,
  pub containers_deleted: usize,
  pub staging_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.images_deleted + self.layers_deleted + self.containers_deleted + self.staging_deleted
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub dry_run: bool,
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

struct Sweep {
  dry_run: bool,
  stats: GcStats,
  deleted_paths: Vec<PathBuf>,
}

impl Sweep {
  /// Delete `path`, or only account for it on a dry run.
  fn remove(&mut self, path: &Path) -> Result<(), GcError> {
    let size = if path.is_dir() {
      dir_size(path)
    } else {
      fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    };

    if self.dry_run {
      debug!(path = %path.display(), size, "would delete");
    } else {
      let result = if path.is_dir() {
        fs::remove_dir_all(path)
      } else {
        fs::remove_file(path)
      };
      result.map_err(|e| GcError::Delete {
        path: path.to_path_buf(),
        message: e.to_string(),
      })?;
      debug!(path = %path.display(), size, "deleted");
    }

    self.stats.bytes_freed += size;
    self.deleted_paths.push(path.to_path_buf());
    Ok(())
  }
}

pub fn collect_garbage(store: &ImageStore, dry_run: bool) -> Result<GcResult, GcError> {
  let _lock = store.lock(LockMode::Exclusive, "kiln gc")?;

  let mut sweep = Sweep {
    dry_run,
    stats: GcStats::default(),
    deleted_paths: Vec::new(),
  };

  let mut live_images: HashSet<ObjectHash> = store.list_tags()?.into_iter().map(|(_, id)| id).collect();
  sweep_containers(store, &mut sweep, &mut live_images)?;
  debug!(count = live_images.len(), "collected live images");

  let live_layers = sweep_images(store, &mut sweep, &live_images)?;
  sweep_layers(store, &mut sweep, &live_layers)?;
  sweep_staging(store, &mut sweep)?;

  info!(
    images_deleted = sweep.stats.images_deleted,
    layers_deleted = sweep.stats.layers_deleted,
    containers_deleted = sweep.stats.containers_deleted,
    bytes_freed = sweep.stats.bytes_freed,
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    dry_run,
    stats: sweep.stats,
    deleted_paths: sweep.deleted_paths,
  })
}

fn sweep_containers(store: &ImageStore, sweep: &mut Sweep, live_images: &mut HashSet<ObjectHash>) -> Result<(), GcError> {
  for record in store.list_containers()? {
    let record = if sweep.dry_run {
      record
    } else {
      refresh(store, record)?
    };

    if !record.state.is_finished() {
      live_images.insert(record.image_id.clone());
      continue;
    }

    for path in [store.container_record_path(&record.id), store.container_lock_path(&record.id)] {
      if path.exists() {
        sweep.remove(&path)?;
      }
    }
    sweep.stats.containers_deleted += 1;
  }
  Ok(())
}

/// Removes dead images and returns the layers the survivors reference.
fn sweep_images(
  store: &ImageStore,
  sweep: &mut Sweep,
  live_images: &HashSet<ObjectHash>,
) -> Result<HashSet<ObjectHash>, GcError> {
  let mut live_layers = HashSet::new();
  let images_dir = store.images_dir();
  if !images_dir.exists() {
    return Ok(live_layers);
  }

  for entry in fs::read_dir(&images_dir)?.flatten() {
    let path = entry.path();
    let Some(id) = path.file_name().and_then(|n| n.to_str()).map(|n| ObjectHash(n.to_string())) else {
      continue;
    };
    sweep.stats.images_scanned += 1;

    if live_images.contains(&id) && is_complete(&path) {
      match store.load_image(&id) {
        Ok(image) => {
          live_layers.extend(image.config.layers.into_iter().map(|layer| layer.id));
          continue;
        }
        Err(e) => warn!(image = %id, error = %e, "unreadable image, removing"),
      }
    }

    sweep.remove(&path)?;
    sweep.stats.images_deleted += 1;
  }

  Ok(live_layers)
}

fn sweep_layers(store: &ImageStore, sweep: &mut Sweep, live_layers: &HashSet<ObjectHash>) -> Result<(), GcError> {
  let layers_dir = store.layers_dir();
  if !layers_dir.exists() {
    return Ok(());
  }

  for entry in fs::read_dir(&layers_dir)?.flatten() {
    let path = entry.path();
    let Some(id) = path.file_name().and_then(|n| n.to_str()).map(|n| ObjectHash(n.to_string())) else {
      continue;
    };
    sweep.stats.layers_scanned += 1;

    if live_layers.contains(&id) {
      continue;
    }
    sweep.remove(&path)?;
    sweep.stats.layers_deleted += 1;
  }
  Ok(())
}

fn sweep_staging(store: &ImageStore, sweep: &mut Sweep) -> Result<(), GcError> {
  let tmp_dir = store.tmp_dir();
  if !tmp_dir.exists() {
    return Ok(());
  }

  for entry in fs::read_dir(&tmp_dir)?.flatten() {
    sweep.remove(&entry.path())?;
    sweep.stats.staging_deleted += 1;
  }
  Ok(())
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::build::{BuildOptions, build};
  use crate::container::{Container, ContainerState, RunOptions};
  use crate::descriptor::Descriptor;
  use crate::image::ImageRef;
  use crate::util::testutil::{APP_DESCRIPTOR, add_base, copying_installer, write_app_context};
  use tempfile::TempDir;

  struct Fixture {
    _temp: TempDir,
    store: ImageStore,
    descriptor: Descriptor,
  }

  fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    let context = temp.path().join("src");
    write_app_context(&context);
    fs::write(context.join("kiln.lua"), APP_DESCRIPTOR).unwrap();
    add_base(&store, "python:3.10", copying_installer());
    let descriptor = Descriptor::load(&context.join("kiln.lua")).unwrap();
    Fixture {
      _temp: temp,
      store,
      descriptor,
    }
  }

  #[tokio::test]
  async fn tagged_image_and_its_layers_survive() {
    let f = fixture();
    let outcome = build(&f.store, &f.descriptor, BuildOptions::default()).await.unwrap();

    let result = collect_garbage(&f.store, false).unwrap();

    assert_eq!(result.stats.images_deleted, 0);
    assert_eq!(result.stats.layers_deleted, 0);
    assert!(f.store.has_image(&outcome.image.id));
    assert_eq!(f.store.list_layers().unwrap().len(), 6);
  }

  #[tokio::test]
  async fn superseded_image_is_collected() {
    let f = fixture();
    let first = build(&f.store, &f.descriptor, BuildOptions::default()).await.unwrap();
    fs::write(f.descriptor.dir.join("app.py"), "print('v2')\n").unwrap();
    let second = build(&f.store, &f.descriptor, BuildOptions::default()).await.unwrap();

    let result = collect_garbage(&f.store, false).unwrap();

    assert_eq!(result.stats.images_deleted, 1);
    assert_eq!(result.stats.layers_deleted, 1);
    assert!(!f.store.has_image(&first.image.id));
    assert!(f.store.has_image(&second.image.id));
    assert_eq!(f.store.list_layers().unwrap().len(), 6);
  }

  #[tokio::test]
  async fn dry_run_deletes_nothing() {
    let f = fixture();
    let outcome = build(&f.store, &f.descriptor, BuildOptions::default()).await.unwrap();
    f.store.untag(&ImageRef::parse("minutes").unwrap()).unwrap();

    let result = collect_garbage(&f.store, true).unwrap();

    assert!(result.dry_run);
    assert_eq!(result.stats.images_deleted, 1);
    assert_eq!(result.stats.layers_deleted, 6);
    assert!(result.stats.bytes_freed > 0);
    assert!(f.store.has_image(&outcome.image.id));
  }

  #[tokio::test]
  async fn finished_containers_are_collected() {
    let f = fixture();
    let outcome = build(&f.store, &f.descriptor, BuildOptions::default()).await.unwrap();
    f.store.untag(&ImageRef::parse("minutes").unwrap()).unwrap();

    let mut image = outcome.image.clone();
    image.config.start_command = crate::image::StartCommand::new("/bin/sh", vec!["-c".to_string(), "exit 0".to_string()]);
    image.config.exposed_port = None;
    let record = Container::create(&f.store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap()
      .wait()
      .await
      .unwrap();
    assert_eq!(record.state, ContainerState::Exited { code: Some(0) });

    let result = collect_garbage(&f.store, false).unwrap();

    assert_eq!(result.stats.containers_deleted, 1);
    assert!(f.store.list_containers().unwrap().is_empty());
    assert!(!f.store.has_image(&outcome.image.id));
  }

  #[test]
  fn gc_refuses_to_run_during_a_build() {
    let f = fixture();
    let _build_lock = f.store.lock(LockMode::Shared, "build").unwrap();

    let err = collect_garbage(&f.store, false).unwrap_err();

    assert!(matches!(err, GcError::Store(crate::store::StoreError::Lock(_))));
  }
}
