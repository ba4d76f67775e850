//! Filesystem helpers for staging layers and image roots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Overlay the contents of `src` onto `dest`.
///
/// Directories are created, files and symlinks are replaced. Existing entries
/// in `dest` that are not present in `src` are left alone. Returns the number
/// of files and symlinks written.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<u64> {
  let mut written = 0;
  fs::create_dir_all(dest)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }

    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      if target.is_file() || target.is_symlink() {
        fs::remove_file(&target)?;
      }
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      remove_existing(&target)?;
      let link_target = fs::read_link(entry.path())?;
      create_symlink(&link_target, &target)?;
      written += 1;
    } else if file_type.is_file() {
      remove_existing_dir(&target)?;
      fs::copy(entry.path(), &target)?;
      written += 1;
    }
  }

  Ok(written)
}

/// Copy a single file, creating parent directories as needed.
pub fn copy_file(src: &Path, dest: &Path) -> io::Result<()> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent)?;
  }
  remove_existing_dir(dest)?;
  fs::copy(src, dest)?;
  Ok(())
}

/// Relative paths of every file and symlink below `root`, sorted.
pub fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  if !root.exists() {
    return Ok(files);
  }

  for entry in WalkDir::new(root).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    if entry.file_type().is_dir() {
      continue;
    }
    let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
    files.push(rel.to_path_buf());
  }

  Ok(files)
}

/// Total size in bytes of the files below `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

/// Write `content` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
  let parent = path.parent().unwrap_or(Path::new("."));
  fs::create_dir_all(parent)?;

  let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
  temp_name.push(format!(".tmp.{}", std::process::id()));
  let temp_path = parent.join(temp_name);

  fs::write(&temp_path, content)?;
  fs::rename(&temp_path, path)
}

fn remove_existing(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn remove_existing_dir(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(path),
    _ => Ok(()),
  }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
  let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
  if resolved.is_dir() {
    std::os::windows::fs::symlink_dir(target, link)
  } else {
    std::os::windows::fs::symlink_file(target, link)
  }
}
