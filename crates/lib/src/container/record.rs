use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::image::StartCommand;
use crate::util::hash::ObjectHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContainerState {
  Created,
  Running {
    pid: u32,
  },
  /// Exit code 0, or stopped on request (`code` is `None`).
  Exited {
    code: Option<i32>,
  },
  /// Non-zero exit, death by signal, or failure to start.
  Crashed {
    code: Option<i32>,
    reason: Option<String>,
  },
}

impl ContainerState {
  pub fn name(&self) -> &'static str {
    match self {
      ContainerState::Created => "CREATED",
      ContainerState::Running { .. } => "RUNNING",
      ContainerState::Exited { .. } => "EXITED",
      ContainerState::Crashed { .. } => "CRASHED",
    }
  }

  pub fn is_finished(&self) -> bool {
    matches!(self, ContainerState::Exited { .. } | ContainerState::Crashed { .. })
  }

  /// Exit code to report for a finished container.
  pub fn exit_code(&self) -> Option<i32> {
    match self {
      ContainerState::Exited { code } => Some(code.unwrap_or(0)),
      ContainerState::Crashed { code, .. } => Some(code.unwrap_or(1)),
      _ => None,
    }
  }
}

impl fmt::Display for ContainerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ContainerState::Running { pid } => write!(f, "RUNNING (pid {})", pid),
      ContainerState::Exited { code: Some(code) } => write!(f, "EXITED ({})", code),
      ContainerState::Exited { code: None } => write!(f, "EXITED (stopped)"),
      ContainerState::Crashed { code: Some(code), .. } => write!(f, "CRASHED ({})", code),
      ContainerState::Crashed { reason: Some(reason), .. } => write!(f, "CRASHED ({})", reason),
      other => f.write_str(other.name()),
    }
  }
}

/// Persisted state of one container, `containers/<id>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub image_id: ObjectHash,
  pub command: StartCommand,
  pub port: Option<u16>,
  #[serde(flatten)]
  pub state: ContainerState,
  pub created_at_unix: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at_unix: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub name: Option<String>,
  /// Added on top of the image environment.
  pub env: BTreeMap<String, String>,
}
