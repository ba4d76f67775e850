//! Built images and tags.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::marker::{is_complete, write_marker};
use super::{ImageStore, StoreError, install_dir, read_json, write_json};
use crate::image::{BuiltImage, ImageRef};
use crate::util::fs::write_atomic;
use crate::util::hash::ObjectHash;

const IMAGE_FILE: &str = "image.json";

impl ImageStore {
  pub fn image_dir(&self, id: &ObjectHash) -> PathBuf {
    self.images_dir().join(&id.0)
  }

  pub fn image_rootfs(&self, id: &ObjectHash) -> PathBuf {
    self.image_dir(id).join("rootfs")
  }

  pub fn has_image(&self, id: &ObjectHash) -> bool {
    is_complete(&self.image_dir(id))
  }

  /// Store `image` with the root filesystem staged at `rootfs`.
  ///
  /// Returns `false` without touching the store when an identical image
  /// already exists.
  pub fn save_image(&self, image: &BuiltImage, rootfs: &Path) -> Result<bool, StoreError> {
    if self.has_image(&image.id) {
      debug!(image = %image.id, "image already in store");
      return Ok(false);
    }

    let staging = self.staging_dir("image-")?;
    let staged_rootfs = staging.path().join("rootfs");
    std::fs::rename(rootfs, &staged_rootfs).map_err(|source| StoreError::Write {
      path: staged_rootfs.clone(),
      source,
    })?;
    write_json(&staging.path().join(IMAGE_FILE), image)?;
    write_marker(staging.path(), None)?;

    install_dir(staging.path(), &self.image_dir(&image.id))?;
    info!(image = %image.id, "image stored");
    Ok(true)
  }

  pub fn load_image(&self, id: &ObjectHash) -> Result<BuiltImage, StoreError> {
    let dir = self.image_dir(id);
    if !is_complete(&dir) {
      return Err(StoreError::ImageNotFound(id.0.clone()));
    }
    read_json(&dir.join(IMAGE_FILE))
  }

  pub fn list_images(&self) -> Result<Vec<BuiltImage>, StoreError> {
    let root = self.images_dir();
    if !root.exists() {
      return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(&root).map_err(|source| StoreError::Read {
      path: root.clone(),
      source,
    })?;

    let mut images = Vec::new();
    for entry in entries.flatten() {
      let Some(name) = entry.file_name().to_str().map(str::to_string) else {
        continue;
      };
      let id = ObjectHash(name);
      if self.has_image(&id) {
        images.push(self.load_image(&id)?);
      }
    }

    images.sort_by(|a, b| b.created_at_unix.cmp(&a.created_at_unix).then(a.id.cmp(&b.id)));
    Ok(images)
  }

  fn tag_path(&self, reference: &ImageRef) -> PathBuf {
    self.tags_dir().join(reference.to_rel_path())
  }

  /// Point `reference` at image `id`, replacing any previous target.
  pub fn tag_image(&self, reference: &ImageRef, id: &ObjectHash) -> Result<(), StoreError> {
    let path = self.tag_path(reference);
    write_atomic(&path, id.0.as_bytes()).map_err(|source| StoreError::Write { path, source })?;
    info!(tag = %reference, image = %id, "image tagged");
    Ok(())
  }

  pub fn tagged(&self, reference: &ImageRef) -> Result<Option<ObjectHash>, StoreError> {
    let path = self.tag_path(reference);
    if !path.is_file() {
      return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|source| StoreError::Read { path, source })?;
    Ok(Some(ObjectHash(content.trim().to_string())))
  }

  pub fn untag(&self, reference: &ImageRef) -> Result<(), StoreError> {
    let path = self.tag_path(reference);
    match std::fs::remove_file(&path) {
      Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(StoreError::Write { path, source: e }),
      _ => Ok(()),
    }
  }

  /// All tags, sorted by reference.
  pub fn list_tags(&self) -> Result<Vec<(ImageRef, ObjectHash)>, StoreError> {
    let root = self.tags_dir();
    let mut tags = Vec::new();
    if !root.exists() {
      return Ok(tags);
    }

    for entry in WalkDir::new(&root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
      if !entry.file_type().is_file() {
        continue;
      }
      let Ok(rel) = entry.path().strip_prefix(&root) else {
        continue;
      };
      let mut segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
      let Some(tag) = segments.pop() else {
        continue;
      };
      // Leftover of an interrupted atomic write
      if tag.contains(".tmp.") {
        continue;
      }
      let Ok(reference) = ImageRef::new(&segments.join("/"), &tag) else {
        continue;
      };
      if let Some(id) = self.tagged(&reference)? {
        tags.push((reference, id));
      }
    }

    tags.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(tags)
  }

  /// Resolve a tag (`name[:tag]`) or an image id prefix to a stored image.
  pub fn resolve_image(&self, query: &str) -> Result<BuiltImage, StoreError> {
    if let Ok(reference) = ImageRef::parse(query)
      && let Some(id) = self.tagged(&reference)?
    {
      return self.load_image(&id);
    }

    let is_hex = !query.is_empty() && query.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex {
      let mut matches: Vec<BuiltImage> = self
        .list_images()?
        .into_iter()
        .filter(|image| image.id.0.starts_with(query))
        .collect();

      return match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(StoreError::ImageNotFound(query.to_string())),
        count => Err(StoreError::AmbiguousImage {
          query: query.to_string(),
          count,
        }),
      };
    }

    Err(StoreError::ImageNotFound(query.to_string()))
  }
}
