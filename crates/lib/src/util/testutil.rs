//! Test fixtures for kiln-lib.
//!
//! Bases use `/bin/sh` as their installer so builds run without a real
//! package manager: the "installer" copies the manifest into the deps dir.

use std::fs;
use std::path::Path;

use crate::image::{BaseImage, ImageRef, StartCommand};
use crate::store::ImageStore;

/// Installer argv that records the manifest as installed.
pub fn copying_installer() -> Vec<String> {
  [
    "/bin/sh",
    "-c",
    "mkdir -p \"$1\" && cp \"$2\" \"$1/installed.txt\"",
    "installer",
    "${target}",
    "${manifest}",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

/// Installer argv that always fails like an unresolvable requirement.
pub fn failing_installer() -> Vec<String> {
  [
    "/bin/sh",
    "-c",
    "echo 'ERROR: No matching distribution found for streamlit==0.0.0' >&2; exit 1",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

/// Register a python base under `reference` with the given installer.
pub fn add_base(store: &ImageStore, reference: &str, installer: Vec<String>) -> BaseImage {
  let source = tempfile::TempDir::new().unwrap();
  fs::create_dir_all(source.path().join("rootfs/usr/local/bin")).unwrap();
  fs::write(source.path().join("rootfs/usr/local/bin/python3"), "#!fake").unwrap();

  let config = serde_json::json!({
    "runtime": { "name": "python", "version": "3.10" },
    "env": { "PYTHONPATH": "${rootfs}/opt/deps" },
    "installer": installer,
  });
  fs::write(source.path().join("base.json"), config.to_string()).unwrap();

  store
    .add_base(&ImageRef::parse(reference).unwrap(), source.path())
    .unwrap()
}

/// Write a small web application source tree into `dir`.
pub fn write_app_context(dir: &Path) {
  fs::create_dir_all(dir.join("config")).unwrap();
  fs::create_dir_all(dir.join("core")).unwrap();
  fs::create_dir_all(dir.join("utils")).unwrap();
  fs::write(dir.join("requirements.txt"), "streamlit==1.28.0\n").unwrap();
  fs::write(dir.join("config/settings.toml"), "[server]\nport = 8502\n").unwrap();
  fs::write(dir.join("core/engine.py"), "def run():\n    pass\n").unwrap();
  fs::write(dir.join("utils/helpers.py"), "def helper():\n    pass\n").unwrap();
  fs::write(dir.join("app.py"), "import streamlit as st\nst.title('minutes')\n").unwrap();
}

pub fn streamlit_command() -> StartCommand {
  StartCommand::new(
    "streamlit",
    ["run", "app.py", "--server.port=8502", "--server.address=0.0.0.0"]
      .into_iter()
      .map(String::from)
      .collect(),
  )
}

/// Descriptor source for the application written by `write_app_context`.
pub const APP_DESCRIPTOR: &str = r#"
return {
  tag = "minutes:latest",
  base = "python:3.10",
  runtime = "python",
  steps = {
    kiln.workdir("/app"),
    kiln.copy("requirements.txt", "."),
    kiln.install("requirements.txt"),
    kiln.copy("config", "config/"),
    kiln.copy("core", "core/"),
    kiln.copy("utils", "utils/"),
    kiln.copy("app.py", "."),
    kiln.expose(8502),
    kiln.cmd({ "streamlit", "run", "app.py", "--server.port=8502", "--server.address=0.0.0.0" }),
  },
}
"#;
