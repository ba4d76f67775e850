//! Dependency installer invocation.
//!
//! The installer named by the base image runs on the host with a cleared
//! environment, the same way every time:
//! - `PATH` from the host so the installer can be found
//! - `HOME` and `TMPDIR`/`TMP`/`TEMP` pointing at the build's scratch directory
//! - `LANG`/`LC_ALL` set to `C` and a fixed `SOURCE_DATE_EPOCH`
//! - the base image's environment on top
//!
//! The caller points the working directory at the layer being built, so
//! files the installer leaves there are captured with the layer.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::BuildError;
use crate::consts::SOURCE_DATE_EPOCH;
use crate::image::ImagePath;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const STDERR_TAIL_LINES: usize = 20;

pub(crate) async fn run_installer(
  argv: &[String],
  env: &BTreeMap<String, String>,
  cwd: &Path,
  scratch: &Path,
  manifest: &ImagePath,
) -> Result<(), BuildError> {
  let Some((program, args)) = argv.split_first() else {
    return Err(BuildError::DependencyResolution {
      manifest: manifest.clone(),
      code: None,
      message: "base image declares no installer".to_string(),
    });
  };

  info!(installer = %program, manifest = %manifest, "installing dependencies");
  tokio::fs::create_dir_all(scratch).await?;

  let host_path = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());

  let mut command = Command::new(program);
  command
    .args(args)
    .current_dir(cwd)
    .env_clear()
    .env("PATH", host_path)
    .env("HOME", scratch)
    .env("TMPDIR", scratch)
    .env("TMP", scratch)
    .env("TEMP", scratch)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .stdin(Stdio::null())
    .kill_on_drop(true);

  #[cfg(windows)]
  if let Some(root) = std::env::var_os("SystemRoot") {
    command.env("SystemRoot", root);
  }

  for (key, value) in env {
    command.env(key, value);
  }

  debug!(cwd = ?cwd, args = ?args, "spawning installer");

  let output = command.output().await.map_err(|e| BuildError::DependencyResolution {
    manifest: manifest.clone(),
    code: None,
    message: format!("failed to run `{}`: {}", program, e),
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout);
  if !stdout.trim().is_empty() {
    debug!(stdout = %stdout.trim(), "installer output");
  }

  if !output.status.success() {
    return Err(BuildError::DependencyResolution {
      manifest: manifest.clone(),
      code: output.status.code(),
      message: stderr_tail(&output.stderr),
    });
  }

  Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
  let text = String::from_utf8_lossy(stderr);
  let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
  if lines.is_empty() {
    return "installer failed without output".to_string();
  }
  lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n")
}
