use predicates::prelude::*;

use super::common::{BASE_CONFIG, TestEnv};

#[test]
fn base_add_then_list() {
  let env = TestEnv::new();
  env.add_base(BASE_CONFIG);

  env
    .kiln_cmd()
    .args(["base", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("python:3.10"))
    .stdout(predicate::str::contains("python 3.10"));
}

#[test]
fn base_without_config_is_rejected() {
  let env = TestEnv::new();
  let dir = env.temp.path().join("empty-base");
  std::fs::create_dir_all(&dir).unwrap();

  env
    .kiln_cmd()
    .args(["base", "add", "python:3.10"])
    .arg(&dir)
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid base image"));
}
