//! Base runtime images: `bases/<name>/<tag>/{base.json,rootfs/}`.

use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use super::marker::{read_marker, write_hashed_marker};
use super::{ImageStore, StoreError, create_dir, install_dir, read_json};
use crate::image::{BaseConfig, BaseImage, ImageRef};
use crate::lock::LockMode;
use crate::util::fs::copy_tree;
use crate::util::hash::ContentHash;

const BASE_CONFIG_FILE: &str = "base.json";

impl ImageStore {
  pub fn base_dir(&self, reference: &ImageRef) -> PathBuf {
    self.bases_dir().join(reference.to_rel_path())
  }

  /// Register the base image found at `source` under `reference`.
  ///
  /// `source` must contain `base.json`; `rootfs/` is optional and defaults to
  /// an empty tree. A previous base with the same reference is replaced.
  pub fn add_base(&self, reference: &ImageRef, source: &Path) -> Result<BaseImage, StoreError> {
    let _lock = self.lock(LockMode::Exclusive, "kiln base add")?;
    let config_path = source.join(BASE_CONFIG_FILE);
    let config: BaseConfig = read_json(&config_path).map_err(|e| StoreError::InvalidBase {
      path: source.to_path_buf(),
      message: e.to_string(),
    })?;

    if config.installer.is_empty() {
      return Err(StoreError::InvalidBase {
        path: source.to_path_buf(),
        message: "installer command is empty".to_string(),
      });
    }

    let staging = self.staging_dir("base-")?;
    let write_err = |source| StoreError::Write {
      path: staging.path().to_path_buf(),
      source,
    };

    std::fs::copy(&config_path, staging.path().join(BASE_CONFIG_FILE)).map_err(write_err)?;
    let rootfs = staging.path().join("rootfs");
    let source_rootfs = source.join("rootfs");
    if source_rootfs.is_dir() {
      copy_tree(&source_rootfs, &rootfs).map_err(write_err)?;
    } else {
      create_dir(&rootfs)?;
    }

    let digest = write_hashed_marker(staging.path())?;
    let dir = self.base_dir(reference);
    install_dir(staging.path(), &dir)?;

    info!(base = %reference, digest = %digest, "base image registered");

    Ok(BaseImage {
      reference: reference.clone(),
      config,
      dir,
      digest,
    })
  }

  /// Look up a registered base. `None` if absent or incomplete.
  pub fn resolve_base(&self, reference: &ImageRef) -> Result<Option<BaseImage>, StoreError> {
    let dir = self.base_dir(reference);
    load_base(reference.clone(), dir)
  }

  pub fn list_bases(&self) -> Result<Vec<BaseImage>, StoreError> {
    let root = self.bases_dir();
    let mut bases = Vec::new();
    if !root.exists() {
      return Ok(bases);
    }

    let walker = WalkDir::new(&root)
      .sort_by_file_name()
      .into_iter()
      .filter_entry(|e| e.file_name() != "rootfs");

    for entry in walker.filter_map(|e| e.ok()) {
      if entry.file_name() != BASE_CONFIG_FILE {
        continue;
      }
      let Some(dir) = entry.path().parent() else {
        continue;
      };
      let Some(reference) = reference_from_dir(&root, dir) else {
        continue;
      };
      if let Some(base) = load_base(reference, dir.to_path_buf())? {
        bases.push(base);
      }
    }

    Ok(bases)
  }
}

fn load_base(reference: ImageRef, dir: PathBuf) -> Result<Option<BaseImage>, StoreError> {
  let config_path = dir.join(BASE_CONFIG_FILE);
  if !config_path.exists() {
    return Ok(None);
  }

  let Some(marker) = read_marker(&dir)? else {
    return Ok(None);
  };
  let digest = ContentHash(marker.output_hash.unwrap_or_default());
  let config = read_json(&config_path)?;

  Ok(Some(BaseImage {
    reference,
    config,
    dir,
    digest,
  }))
}

fn reference_from_dir(root: &Path, dir: &Path) -> Option<ImageRef> {
  let rel = dir.strip_prefix(root).ok()?;
  let mut segments: Vec<String> = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  let tag = segments.pop()?;
  ImageRef::new(&segments.join("/"), &tag).ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn write_base_source(dir: &Path) {
    fs::create_dir_all(dir.join("rootfs/usr/bin")).unwrap();
    fs::write(dir.join("rootfs/usr/bin/python3"), "#!fake").unwrap();
    fs::write(
      dir.join(BASE_CONFIG_FILE),
      r#"{ "runtime": { "name": "python", "version": "3.10" }, "env": { "LANG": "C.UTF-8" } }"#,
    )
    .unwrap();
  }

  #[test]
  fn add_then_resolve_base() {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    let source = temp.path().join("python");
    write_base_source(&source);
    let reference = ImageRef::parse("python:3.10-slim").unwrap();

    let added = store.add_base(&reference, &source).unwrap();
    let resolved = store.resolve_base(&reference).unwrap().unwrap();

    assert_eq!(resolved.digest, added.digest);
    assert_eq!(resolved.config.runtime.version, "3.10");
    assert!(resolved.rootfs().join("usr/bin/python3").exists());
  }

  #[test]
  fn unknown_base_resolves_to_none() {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path());
    let reference = ImageRef::parse("ruby:3").unwrap();
    assert!(store.resolve_base(&reference).unwrap().is_none());
  }

  #[test]
  fn base_without_config_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    let reference = ImageRef::parse("python:3.10").unwrap();

    let err = store.add_base(&reference, temp.path()).unwrap_err();
    assert!(matches!(err, StoreError::InvalidBase { .. }));
  }

  #[test]
  fn add_base_is_refused_while_a_build_holds_the_store() {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    let source = temp.path().join("python");
    write_base_source(&source);
    let reference = ImageRef::parse("python:3.10").unwrap();

    let build_lock = store.lock(LockMode::Shared, "build").unwrap();
    let err = store.add_base(&reference, &source).unwrap_err();
    assert!(matches!(&err, StoreError::Lock(e) if e.is_contention()));
    assert!(store.resolve_base(&reference).unwrap().is_none());

    drop(build_lock);
    assert!(store.add_base(&reference, &source).is_ok());
  }

  #[test]
  fn list_bases_reconstructs_references() {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    let source = temp.path().join("python");
    write_base_source(&source);

    store.add_base(&ImageRef::parse("library/python:3.10").unwrap(), &source).unwrap();
    store.add_base(&ImageRef::parse("python:3.12").unwrap(), &source).unwrap();

    let refs: Vec<String> = store
      .list_bases()
      .unwrap()
      .into_iter()
      .map(|b| b.reference.to_string())
      .collect();
    assert_eq!(refs, vec!["library/python:3.10", "python:3.12"]);
  }
}
