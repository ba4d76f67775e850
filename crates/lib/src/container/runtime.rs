use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::{ContainerRecord, ContainerState, PortLease, RunError, RunOptions};
use crate::image::{BuiltImage, ImagePath};
use crate::lock::{FileLock, LockMode};
use crate::store::ImageStore;
use crate::util::hash::hash_bytes;
use crate::util::template::render;

const CONTAINER_ID_LEN: usize = 12;

fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

fn new_container_id(image: &BuiltImage) -> String {
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or(0);
  let seed = format!("{}:{}:{}", image.id, nanos, std::process::id());
  hash_bytes(seed.as_bytes()).0[..CONTAINER_ID_LEN].to_string()
}

/// A container in `CREATED`.
#[derive(Debug)]
pub struct Container {
  store: ImageStore,
  image: BuiltImage,
  env: BTreeMap<String, String>,
  record: ContainerRecord,
}

impl Container {
  /// Record a new container for `image`. Nothing runs yet.
  pub fn create(store: &ImageStore, image: &BuiltImage, options: RunOptions) -> Result<Self, RunError> {
    let record = ContainerRecord {
      id: new_container_id(image),
      name: options.name,
      image_id: image.id.clone(),
      command: image.start_command().clone(),
      port: image.exposed_port(),
      state: ContainerState::Created,
      created_at_unix: now_unix(),
      finished_at_unix: None,
    };
    store.save_container(&record)?;
    info!(container = %record.id, image = %image.id, "container created");

    Ok(Self {
      store: store.clone(),
      image: image.clone(),
      env: options.env,
      record,
    })
  }

  pub fn record(&self) -> &ContainerRecord {
    &self.record
  }

  /// Take the declared port and spawn the start command.
  ///
  /// On failure the container is recorded as crashed before the error is
  /// returned. Must be called within a Tokio runtime.
  pub fn start(mut self) -> Result<RunningContainer, RunError> {
    match self.launch() {
      Ok((child, guard, lease)) => {
        let pid = child.id().unwrap_or_default();
        self.record.state = ContainerState::Running { pid };
        self.store.save_container(&self.record)?;
        info!(container = %self.record.id, pid, port = ?self.record.port, "container running");
        Ok(RunningContainer {
          store: self.store,
          record: self.record,
          child,
          _guard: guard,
          _lease: lease,
        })
      }
      Err(err) => {
        warn!(container = %self.record.id, error = %err, "container failed to start");
        self.record.state = ContainerState::Crashed {
          code: None,
          reason: Some(err.to_string()),
        };
        self.record.finished_at_unix = Some(now_unix());
        self.store.save_container(&self.record)?;
        Err(err)
      }
    }
  }

  fn launch(&self) -> Result<(Child, FileLock, Option<PortLease>), RunError> {
    let holder = format!("kiln run {}", self.record.id);
    let guard = FileLock::acquire(
      &self.store.container_lock_path(&self.record.id),
      LockMode::Exclusive,
      &holder,
    )?;
    let lease = match self.record.port {
      Some(port) => Some(PortLease::acquire(&self.store, port, &holder)?),
      None => None,
    };

    let rootfs = self.store.image_rootfs(&self.image.id);
    let workdir = self.image.config.workdir.on_host(&rootfs);
    std::fs::create_dir_all(&workdir)?;

    let mut vars = BTreeMap::new();
    vars.insert("rootfs", rootfs.to_string_lossy().into_owned());
    vars.insert("workdir", workdir.to_string_lossy().into_owned());

    let command = &self.record.command;
    let mut process = Command::new(resolve_executable(&command.executable, &rootfs));
    process
      .args(&command.args)
      .current_dir(&workdir)
      .env_clear()
      .stdin(Stdio::null())
      .kill_on_drop(true);

    for key in ["PATH", "HOME", "USER", "LANG"] {
      if let Some(value) = std::env::var_os(key) {
        process.env(key, value);
      }
    }
    #[cfg(windows)]
    if let Some(root) = std::env::var_os("SystemRoot") {
      process.env("SystemRoot", root);
    }
    for (key, value) in self.image.config.env.iter().chain(&self.env) {
      process.env(key, render(value, &vars));
    }

    let child = process.spawn().map_err(|source| RunError::Spawn {
      command: command.to_string(),
      source,
    })?;

    Ok((child, guard, lease))
  }
}

/// Absolute executables present in the image root run from there; anything
/// else is looked up on the host `PATH`.
fn resolve_executable(executable: &str, rootfs: &std::path::Path) -> PathBuf {
  if let Ok(path) = ImagePath::parse_absolute(executable) {
    let in_image = path.on_host(rootfs);
    if in_image.is_file() {
      return in_image;
    }
  }
  PathBuf::from(executable)
}

/// A container in `RUNNING`. Owns the process, its port lease and its record.
#[derive(Debug)]
pub struct RunningContainer {
  store: ImageStore,
  record: ContainerRecord,
  child: Child,
  _guard: FileLock,
  _lease: Option<PortLease>,
}

impl RunningContainer {
  pub fn id(&self) -> &str {
    &self.record.id
  }

  pub fn record(&self) -> &ContainerRecord {
    &self.record
  }

  /// Wait for the process to exit and record how it ended.
  pub async fn wait(self) -> Result<ContainerRecord, RunError> {
    self.wait_or_stop(std::future::pending()).await
  }

  /// Kill the process. The container is recorded as exited.
  pub async fn stop(mut self) -> Result<ContainerRecord, RunError> {
    if let Some(status) = self.child.try_wait()? {
      return self.finish(finished_state(status));
    }
    self.child.kill().await?;
    info!(container = %self.record.id, "container stopped");
    self.finish(ContainerState::Exited { code: None })
  }

  /// Wait for the process to exit, stopping it if `stop` completes first.
  pub async fn wait_or_stop<F>(mut self, stop: F) -> Result<ContainerRecord, RunError>
  where
    F: Future<Output = ()>,
  {
    let status = tokio::select! {
      status = self.child.wait() => Some(status?),
      _ = stop => None,
    };

    match status {
      Some(status) => self.finish(finished_state(status)),
      None => self.stop().await,
    }
  }

  fn finish(mut self, state: ContainerState) -> Result<ContainerRecord, RunError> {
    info!(container = %self.record.id, state = %state, "container finished");
    self.record.state = state;
    self.record.finished_at_unix = Some(now_unix());
    self.store.save_container(&self.record)?;
    // Locks are released when `self` drops here
    Ok(self.record.clone())
  }
}

fn finished_state(status: ExitStatus) -> ContainerState {
  match status.code() {
    Some(0) => ContainerState::Exited { code: Some(0) },
    Some(code) => ContainerState::Crashed { code: Some(code), reason: None },
    None => ContainerState::Crashed {
      code: None,
      reason: Some(signal_reason(&status)),
    },
  }
}

#[cfg(unix)]
fn signal_reason(status: &ExitStatus) -> String {
  use std::os::unix::process::ExitStatusExt;
  match status.signal() {
    Some(signal) => format!("terminated by signal {}", signal),
    None => "terminated".to_string(),
  }
}

#[cfg(not(unix))]
fn signal_reason(_status: &ExitStatus) -> String {
  "terminated".to_string()
}

/// Reconcile a record with reality.
///
/// A record left `RUNNING` by a supervisor that no longer exists is rewritten
/// as crashed. Other records are returned unchanged.
pub fn refresh(store: &ImageStore, mut record: ContainerRecord) -> Result<ContainerRecord, RunError> {
  if !matches!(record.state, ContainerState::Running { .. }) {
    return Ok(record);
  }

  match FileLock::acquire(&store.container_lock_path(&record.id), LockMode::Exclusive, "kiln refresh") {
    Ok(_held) => {
      // The supervisor may have recorded the exit after `record` was read
      if let Some(current) = store.load_container(&record.id)? {
        record = current;
      }
      if !matches!(record.state, ContainerState::Running { .. }) {
        return Ok(record);
      }
      warn!(container = %record.id, "supervisor is gone, marking container crashed");
      record.state = ContainerState::Crashed {
        code: None,
        reason: Some("supervisor exited".to_string()),
      };
      record.finished_at_unix = Some(now_unix());
      store.save_container(&record)?;
      Ok(record)
    }
    Err(e) if e.is_contention() => Ok(record),
    Err(e) => Err(e.into()),
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::image::{BaseRecord, ImageConfig, ImageRef, RuntimeInfo, StartCommand};
  use crate::util::hash::Hashable;
  use std::net::{Ipv4Addr, TcpListener};
  use std::time::Duration;
  use tempfile::TempDir;

  fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
      .unwrap()
      .local_addr()
      .unwrap()
      .port()
  }

  fn image(store: &ImageStore, script: &str, port: Option<u16>) -> BuiltImage {
    let command = StartCommand::new("/bin/sh", vec!["-c".to_string(), script.to_string()]);
    image_with_command(store, command, port)
  }

  fn image_with_command(store: &ImageStore, start_command: StartCommand, port: Option<u16>) -> BuiltImage {
    let config = ImageConfig {
      base: BaseRecord {
        reference: ImageRef::parse("python:3.10").unwrap(),
        digest: hash_bytes(b"base"),
        runtime: RuntimeInfo {
          name: "python".to_string(),
          version: "3.10".to_string(),
        },
      },
      workdir: ImagePath::parse_absolute("/app").unwrap(),
      env: BTreeMap::from([("APP_ROOT".to_string(), "${workdir}".to_string())]),
      layers: vec![],
      exposed_port: port,
      start_command,
    };
    let image = BuiltImage {
      id: config.compute_hash().unwrap(),
      config,
      created_at_unix: 1,
    };
    let staging = store.staging_dir("rootfs-").unwrap();
    let rootfs = staging.path().join("rootfs");
    std::fs::create_dir_all(rootfs.join("app")).unwrap();
    store.save_image(&image, &rootfs).unwrap();
    image
  }

  fn setup() -> (TempDir, ImageStore) {
    let temp = TempDir::new().unwrap();
    let store = ImageStore::new(temp.path().join("store"));
    (temp, store)
  }

  #[tokio::test]
  async fn clean_exit_is_exited() {
    let (_temp, store) = setup();
    let image = image(&store, "exit 0", Some(free_port()));

    let container = Container::create(&store, &image, RunOptions::default()).unwrap();
    assert_eq!(container.record().state, ContainerState::Created);

    let record = container.start().unwrap().wait().await.unwrap();

    assert_eq!(record.state, ContainerState::Exited { code: Some(0) });
    assert!(record.finished_at_unix.is_some());
    assert_eq!(store.load_container(&record.id).unwrap().unwrap(), record);
  }

  #[tokio::test]
  async fn non_zero_exit_is_crashed() {
    let (_temp, store) = setup();
    let image = image(&store, "exit 3", None);

    let record = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap()
      .wait()
      .await
      .unwrap();

    assert_eq!(
      record.state,
      ContainerState::Crashed {
        code: Some(3),
        reason: None
      }
    );
  }

  #[tokio::test]
  async fn command_runs_in_workdir_with_image_env() {
    let (_temp, store) = setup();
    let image = image(
      &store,
      "[ \"$APP_ROOT\" = \"$(pwd)\" ] && [ \"$EXTRA\" = yes ] && touch started",
      None,
    );
    let options = RunOptions {
      env: BTreeMap::from([("EXTRA".to_string(), "yes".to_string())]),
      ..Default::default()
    };

    let record = Container::create(&store, &image, options)
      .unwrap()
      .start()
      .unwrap()
      .wait()
      .await
      .unwrap();

    assert_eq!(record.state, ContainerState::Exited { code: Some(0) });
    assert!(store.image_rootfs(&image.id).join("app/started").exists());
  }

  #[tokio::test]
  async fn second_instance_on_same_port_fails() {
    let (_temp, store) = setup();
    let port = free_port();
    let image = image(&store, "sleep 30", Some(port));

    let first = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap();

    let second = Container::create(&store, &image, RunOptions::default()).unwrap();
    let second_id = second.record().id.clone();
    let err = second.start().unwrap_err();

    assert!(matches!(err, RunError::PortBindFailure { port: p, .. } if p == port));
    let recorded = store.load_container(&second_id).unwrap().unwrap();
    assert!(matches!(recorded.state, ContainerState::Crashed { code: None, .. }));

    let stopped = first.stop().await.unwrap();
    assert_eq!(stopped.state, ContainerState::Exited { code: None });

    // The port is free again once the first instance is gone
    assert!(PortLease::acquire(&store, port, "check").is_ok());
  }

  #[tokio::test]
  async fn occupied_port_fails_to_start() {
    let (_temp, store) = setup();
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let image = image(&store, "exit 0", Some(port));

    let err = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap_err();

    assert!(matches!(err, RunError::PortBindFailure { .. }));
  }

  #[tokio::test]
  async fn stop_signal_ends_wait() {
    let (_temp, store) = setup();
    let image = image(&store, "sleep 30", Some(free_port()));
    let running = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap();

    let record = running
      .wait_or_stop(tokio::time::sleep(Duration::from_millis(100)))
      .await
      .unwrap();

    assert_eq!(record.state, ContainerState::Exited { code: None });
  }

  #[tokio::test]
  async fn refresh_marks_orphaned_records_crashed() {
    let (_temp, store) = setup();
    let image = image(&store, "exit 0", None);
    let container = Container::create(&store, &image, RunOptions::default()).unwrap();
    let mut record = container.record().clone();
    record.state = ContainerState::Running { pid: 999_999 };
    store.save_container(&record).unwrap();

    let refreshed = refresh(&store, record).unwrap();

    assert_eq!(refreshed.state.name(), "CRASHED");
  }

  #[tokio::test]
  async fn refresh_keeps_live_records() {
    let (_temp, store) = setup();
    let image = image(&store, "sleep 30", None);
    let running = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap();

    let refreshed = refresh(&store, running.record().clone()).unwrap();
    assert_eq!(refreshed.state.name(), "RUNNING");

    running.stop().await.unwrap();
  }

  #[tokio::test]
  async fn start_command_reaches_the_process_verbatim() {
    let (_temp, store) = setup();
    let argv = [
      "/bin/sh",
      "-c",
      "printf '%s\\n' \"$@\" > args",
      "sh",
      "run",
      "app.py",
      "--server.port=8502",
      "--server.address=0.0.0.0",
      "two words",
    ];
    let command = StartCommand::from_argv(argv.iter().map(|a| a.to_string()).collect()).unwrap();
    let image = image_with_command(&store, command, None);

    let record = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap()
      .wait()
      .await
      .unwrap();

    assert_eq!(record.state, ContainerState::Exited { code: Some(0) });
    let args = std::fs::read_to_string(store.image_rootfs(&image.id).join("app/args")).unwrap();
    assert_eq!(args, "run\napp.py\n--server.port=8502\n--server.address=0.0.0.0\ntwo words\n");
  }

  #[tokio::test]
  async fn refresh_keeps_an_exit_recorded_after_listing() {
    let (_temp, store) = setup();
    let image = image(&store, "exit 0", None);
    let running = Container::create(&store, &image, RunOptions::default())
      .unwrap()
      .start()
      .unwrap();
    let listed = running.record().clone();

    let finished = running.wait().await.unwrap();
    let refreshed = refresh(&store, listed).unwrap();

    assert_eq!(refreshed, finished);
    assert_eq!(refreshed.state.name(), "EXITED");
  }
}
