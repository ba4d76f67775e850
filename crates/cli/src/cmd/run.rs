//! `kiln run`: start a container and supervise it until it exits.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use tracing::debug;

use kiln_lib::container::{Container, ContainerState, RunOptions};
use kiln_lib::store::ImageStore;

use super::ctrl_c;
use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat};

/// Returns the exit code `kiln` should exit with.
pub fn cmd_run(
  store: &ImageStore,
  image: &str,
  env: &[String],
  name: Option<String>,
  output: OutputFormat,
) -> Result<i32> {
  let image = store.resolve_image(image)?;
  debug!(image = %image.id, "resolved image");
  let options = RunOptions {
    name,
    env: parse_env(env)?,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let record = rt.block_on(async {
    let container = Container::create(store, &image, options)?;
    let running = container.start().context("Failed to start container")?;

    if !output.is_json() {
      let port = match running.record().port {
        Some(port) => format!(" on 0.0.0.0:{}", port),
        None => String::new(),
      };
      print_info(&format!("Container {} running{}", running.id(), port));
    }

    Ok::<_, anyhow::Error>(running.wait_or_stop(ctrl_c()).await?)
  })?;

  if output.is_json() {
    print_json(&record)?;
  } else {
    if matches!(record.state, ContainerState::Crashed { .. }) {
      print_error(&format!("Container {} crashed", record.id));
    } else {
      print_info(&format!("Container {} finished", record.id));
    }
    print_stat("State", &record.state.to_string());
  }

  Ok(record.state.exit_code().unwrap_or(1))
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
  let mut env = BTreeMap::new();
  for pair in pairs {
    let Some((key, value)) = pair.split_once('=') else {
      bail!("Invalid environment variable `{}`: expected KEY=VALUE", pair);
    };
    if key.is_empty() {
      bail!("Invalid environment variable `{}`: empty key", pair);
    }
    env.insert(key.to_string(), value.to_string());
  }
  Ok(env)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn env_pairs_are_parsed() {
    let env = parse_env(&["A=1".to_string(), "URL=http://x?a=b".to_string()]).unwrap();
    assert_eq!(env["A"], "1");
    assert_eq!(env["URL"], "http://x?a=b");
  }

  #[test]
  fn malformed_env_pairs_are_rejected() {
    assert!(parse_env(&["NOVALUE".to_string()]).is_err());
    assert!(parse_env(&["=x".to_string()]).is_err());
  }
}
