use std::net::TcpListener;

use predicates::prelude::*;

use super::common::{TestEnv, free_port};

#[test]
fn clean_exit_is_recorded_as_exited() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  env.build();

  env
    .kiln_cmd()
    .args(["run", "minutes:latest"])
    .assert()
    .success()
    .stdout(predicate::str::contains("EXITED"));

  env
    .kiln_cmd()
    .args(["ps", "--all"])
    .assert()
    .success()
    .stdout(predicate::str::contains("EXITED"));
}

#[test]
fn non_zero_exit_is_crashed_and_propagated() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 3);
  env.build();

  env
    .kiln_cmd()
    .args(["run", "minutes:latest"])
    .assert()
    .code(3)
    .stdout(predicate::str::contains("CRASHED"))
    .stderr(predicate::str::contains("crashed"));
}

#[test]
fn occupied_port_is_a_bind_failure() {
  let env = TestEnv::new();
  let listener = TcpListener::bind("0.0.0.0:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  env.app_exiting_with(port, 0);
  env.build();

  env
    .kiln_cmd()
    .args(["run", "minutes:latest"])
    .assert()
    .failure()
    .stderr(predicate::str::contains(format!("port {} is unavailable", port)));

  env
    .kiln_cmd()
    .args(["ps", "--all", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("crashed"));
}

#[test]
fn user_env_reaches_the_process() {
  let env = TestEnv::new();
  env.add_base(super::common::BASE_CONFIG);
  env.write_app();
  env.write_descriptor(free_port(), &["/bin/sh", "-c", "test \"$GREETING\" = hello"]);
  env.build();

  env
    .kiln_cmd()
    .args(["run", "minutes:latest", "-e", "GREETING=hello"])
    .assert()
    .success();
}

#[test]
fn start_command_arguments_are_passed_verbatim() {
  let env = TestEnv::new();
  env.add_base(super::common::BASE_CONFIG);
  env.write_app();
  env.write_descriptor(
    free_port(),
    &[
      "/bin/sh",
      "-c",
      "printf '%s\\n' \"$@\" > args",
      "sh",
      "run",
      "app.py",
      "--server.port=8502",
      "--server.address=0.0.0.0",
    ],
  );
  let id = env.build();

  env.kiln_cmd().args(["run", "minutes:latest"]).assert().success();

  let args = std::fs::read_to_string(env.store_path().join(format!("images/{}/rootfs/app/args", id))).unwrap();
  assert_eq!(args, "run\napp.py\n--server.port=8502\n--server.address=0.0.0.0\n");
}

#[test]
fn finished_containers_are_hidden_from_ps() {
  let env = TestEnv::new();
  env.app_exiting_with(free_port(), 0);
  env.build();
  env.kiln_cmd().args(["run", "minutes:latest", "--name", "web"]).assert().success();

  env
    .kiln_cmd()
    .arg("ps")
    .assert()
    .success()
    .stdout(predicate::str::contains("No running containers"));
}
