//! Shared test helpers for CLI integration tests.

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// `base.json` for a python base whose installer copies the manifest into
/// the deps directory.
pub const BASE_CONFIG: &str = r#"{
  "runtime": { "name": "python", "version": "3.10" },
  "env": { "PYTHONPATH": "${rootfs}/opt/deps" },
  "installer": ["/bin/sh", "-c", "mkdir -p \"$1\" && cp \"$2\" \"$1/installed.txt\"", "installer", "${target}", "${manifest}"]
}"#;

/// Same base, but dependency resolution always fails.
pub const FAILING_BASE_CONFIG: &str = r#"{
  "runtime": { "name": "python", "version": "3.10" },
  "installer": ["/bin/sh", "-c", "echo 'No matching distribution found' >&2; exit 1"]
}"#;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the store, a base
/// image source and a build context.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// Build context directory.
  pub fn context(&self) -> PathBuf {
    let p = self.temp.path().join("app");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Write a file relative to the build context.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.context().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Write the sample application sources.
  pub fn write_app(&self) {
    self.write_file("requirements.txt", "streamlit==1.28.0\n");
    self.write_file("config/settings.toml", "[server]\nport = 8502\n");
    self.write_file("core/engine.py", "def run():\n    return 42\n");
    self.write_file("utils/helpers.py", "def fmt(x):\n    return str(x)\n");
    self.write_file("app.py", "import streamlit as st\n");
  }

  /// Write `kiln.lua` into the build context.
  pub fn write_descriptor(&self, port: u16, command: &[&str]) {
    let argv: Vec<String> = command.iter().map(|a| format!("{:?}", a)).collect();
    let content = format!(
      r#"
return {{
  tag = "minutes:latest",
  base = "python:3.10",
  runtime = "python",
  steps = {{
    kiln.workdir("/app"),
    kiln.copy("requirements.txt", "."),
    kiln.install("requirements.txt"),
    kiln.copy("config", "config/"),
    kiln.copy("core", "core/"),
    kiln.copy("utils", "utils/"),
    kiln.copy("app.py", "."),
    kiln.expose({port}),
    kiln.cmd({{ {argv} }}),
  }},
}}
"#,
      port = port,
      argv = argv.join(", ")
    );
    self.write_file("kiln.lua", &content);
  }

  /// Register `python:3.10` from a base directory holding `config`.
  pub fn add_base(&self, config: &str) {
    let dir = self.temp.path().join("base");
    std::fs::create_dir_all(dir.join("rootfs/usr/local/bin")).unwrap();
    std::fs::write(dir.join("rootfs/usr/local/bin/python3"), "").unwrap();
    std::fs::write(dir.join("base.json"), config).unwrap();

    self.kiln_cmd().args(["base", "add", "python:3.10"]).arg(&dir).assert().success();
  }

  /// Base, sources and a descriptor whose command exits with `exit_code`.
  pub fn app_exiting_with(&self, port: u16, exit_code: i32) {
    self.add_base(BASE_CONFIG);
    self.write_app();
    let script = format!("test -f app.py && exit {}", exit_code);
    self.write_descriptor(port, &["/bin/sh", "-c", &script]);
  }

  /// Build the context and return the image id.
  pub fn build(&self) -> String {
    let output = self
      .kiln_cmd()
      .arg("build")
      .arg(self.context())
      .args(["-o", "json"])
      .output()
      .unwrap();
    assert!(output.status.success(), "build failed: {}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    json["id"].as_str().unwrap().to_string()
  }

  /// Get a pre-configured Command for the kiln binary.
  ///
  /// Sets environment variables for isolated testing:
  /// - `KILN_STORE`: Isolated store path
  /// - `XDG_DATA_HOME`: Isolated data path
  /// - `APPDATA`: Isolated data path (for Windows)
  pub fn kiln_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.env("KILN_STORE", self.store_path());
    cmd.env("XDG_DATA_HOME", self.temp.path().join("data"));
    cmd.env("APPDATA", self.temp.path().join("data"));
    cmd
  }

  pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
    self.store_path().join(relative).exists()
  }
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
  TcpListener::bind("0.0.0.0:0").unwrap().local_addr().unwrap().port()
}
