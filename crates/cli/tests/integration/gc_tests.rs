use predicates::prelude::*;

use super::common::{TestEnv, free_port};

#[test]
fn gc_with_no_store_succeeds() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .arg("gc")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .arg("gc")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("images_deleted"))
    .stdout(predicate::str::contains("layers_deleted"))
    .stdout(predicate::str::contains("deleted_paths"));
}

#[test]
fn gc_keeps_tagged_image() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  let id = env.build();

  env.kiln_cmd().arg("gc").assert().success();

  assert!(env.exists(format!("images/{}", id)));
  env.kiln_cmd().args(["inspect", &id]).assert().success();
}

#[test]
fn gc_collects_untagged_image() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  let first = env.build();

  env.write_file("app.py", "import streamlit as st\nst.title('minutes')\n");
  let second = env.build();
  assert_ne!(first, second);

  env.kiln_cmd().arg("gc").assert().success();

  assert!(!env.exists(format!("images/{}", first)));
  assert!(env.exists(format!("images/{}", second)));
}

#[test]
fn untagged_image_is_collected() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  let id = env.build();

  env
    .kiln_cmd()
    .args(["untag", "minutes:latest"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Untagged minutes:latest"));
  assert!(!env.exists("tags/minutes/latest"));

  env
    .kiln_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Total removed"));

  assert!(!env.exists(format!("images/{}", id)));
  env.kiln_cmd().args(["inspect", &id]).assert().failure();
}

#[test]
fn untag_of_unknown_tag_fails() {
  let env = TestEnv::new();

  env
    .kiln_cmd()
    .args(["untag", "nothing:here"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No image is tagged 'nothing:here'"));
}
