//! `kiln build`: evaluate a descriptor and build its image.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use kiln_lib::build::{BuildOptions, BuildPhase, build_until};
use kiln_lib::consts::DESCRIPTOR_FILENAME;
use kiln_lib::descriptor::Descriptor;
use kiln_lib::image::ImageRef;
use kiln_lib::store::ImageStore;

use super::ctrl_c;
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success};

pub fn cmd_build(
  store: &ImageStore,
  context: &Path,
  file: Option<&Path>,
  tag: Option<&str>,
  output: OutputFormat,
) -> Result<()> {
  let start = Instant::now();

  let descriptor_path = match file {
    Some(file) => file.to_path_buf(),
    None => context.join(DESCRIPTOR_FILENAME),
  };
  debug!(descriptor = %descriptor_path.display(), context = %context.display(), "loading descriptor");
  let descriptor = Descriptor::load(&descriptor_path)
    .with_context(|| format!("Failed to load descriptor {}", descriptor_path.display()))?;

  let options = BuildOptions {
    context_dir: Some(context.to_path_buf()),
    tag: tag.map(ImageRef::parse).transpose().context("Invalid tag")?,
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt
    .block_on(build_until(store, &descriptor, options, ctrl_c()))
    .context("Build failed")?;

  let image = &outcome.image;
  if output.is_json() {
    print_json(&serde_json::json!({
      "id": image.id,
      "tag": outcome.tag.as_ref().map(ToString::to_string),
      "phase": BuildPhase::ImageReady,
      "exposed_port": image.exposed_port(),
      "start_command": image.start_command().argv(),
      "layers_built": outcome.layers_built,
      "layers_cached": outcome.layers_cached,
      "reused": outcome.reused,
    }))?;
  } else {
    print_success(&format!("Image ready: {}", image.id));
    if let Some(tag) = &outcome.tag {
      print_stat("Tag", &tag.to_string());
    }
    if let Some(port) = image.exposed_port() {
      print_stat("Exposed port", &port.to_string());
    }
    print_stat("Command", &image.start_command().to_string());
    print_stat(
      "Layers",
      &format!("{} built, {} cached", outcome.layers_built, outcome.layers_cached),
    );
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
