use predicates::prelude::*;

use super::common::{FAILING_BASE_CONFIG, TestEnv, free_port};

#[test]
fn build_produces_tagged_image() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);

  env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .assert()
    .success()
    .stdout(predicate::str::contains("Image ready"))
    .stdout(predicate::str::contains("minutes:latest"));

  env
    .kiln_cmd()
    .arg("images")
    .assert()
    .success()
    .stdout(predicate::str::contains("minutes:latest"));
}

#[test]
fn rebuild_yields_the_same_image() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);

  let first = env.build();
  let output = env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .args(["-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["id"], first);
  assert_eq!(json["layers_built"], 0);
  assert_eq!(json["reused"], true);
  assert_eq!(json["phase"], "IMAGE_READY");
}

#[test]
fn inspect_shows_port_and_command() {
  let env = TestEnv::new();
  let port = free_port();
  env.app_exiting_with(port, 0);
  env.build();

  env
    .kiln_cmd()
    .args(["inspect", "minutes:latest"])
    .assert()
    .success()
    .stdout(predicate::str::contains(port.to_string()))
    .stdout(predicate::str::contains("/bin/sh -c"))
    .stdout(predicate::str::contains("PYTHONPATH"));
}

#[test]
fn missing_source_fails_the_build() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  std::fs::remove_file(env.context().join("app.py")).unwrap();

  env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .assert()
    .failure()
    .stderr(predicate::str::contains("copy source not found"));

  env
    .kiln_cmd()
    .args(["inspect", "minutes:latest"])
    .assert()
    .failure();
}

#[test]
fn unknown_base_fails_the_build() {
  let env = TestEnv::new();
  env.write_app();
  env.write_descriptor(free_port(), &["/bin/true"]);

  env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .assert()
    .failure()
    .stderr(predicate::str::contains("unresolved base image"));
}

#[test]
fn failed_dependency_install_fails_the_build() {
  let env = TestEnv::new();
  env.add_base(FAILING_BASE_CONFIG);
  env.write_app();
  env.write_descriptor(free_port(), &["/bin/true"]);

  env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency resolution failed"))
    .stderr(predicate::str::contains("No matching distribution"));
}

#[test]
fn tag_flag_overrides_descriptor() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);

  env
    .kiln_cmd()
    .arg("build")
    .arg(env.context())
    .args(["-t", "other:v2"])
    .assert()
    .success();

  env.kiln_cmd().args(["inspect", "other:v2"]).assert().success();
  env.kiln_cmd().args(["inspect", "minutes:latest"]).assert().failure();
}
