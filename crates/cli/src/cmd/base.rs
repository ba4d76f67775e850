//! `kiln base add|list`.

use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::image::ImageRef;
use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, truncate_hash};

pub fn cmd_base_add(store: &ImageStore, reference: &str, dir: &Path, output: OutputFormat) -> Result<()> {
  let reference = ImageRef::parse(reference).context("Invalid base reference")?;
  let base = store
    .add_base(&reference, dir)
    .with_context(|| format!("Failed to register base image from {}", dir.display()))?;

  if output.is_json() {
    print_json(&serde_json::json!({
      "reference": base.reference,
      "digest": base.digest,
      "runtime": base.config.runtime,
    }))?;
  } else {
    print_success(&format!("Registered base {}", base.reference));
    print_stat(
      "Runtime",
      &format!("{} {}", base.config.runtime.name, base.config.runtime.version),
    );
    print_stat("Digest", truncate_hash(&base.digest.0));
  }

  Ok(())
}

pub fn cmd_base_list(store: &ImageStore, output: OutputFormat) -> Result<()> {
  let bases = store.list_bases()?;

  if output.is_json() {
    let list: Vec<_> = bases
      .iter()
      .map(|base| {
        serde_json::json!({
          "reference": base.reference,
          "digest": base.digest,
          "runtime": base.config.runtime,
          "installer": base.config.installer,
        })
      })
      .collect();
    print_json(&list)?;
    return Ok(());
  }

  if bases.is_empty() {
    print_info("No base images. Register one with 'kiln base add <name:tag> <dir>'.");
    return Ok(());
  }

  println!("{:<30} {:<16} DIGEST", "BASE", "RUNTIME");
  for base in &bases {
    println!(
      "{:<30} {:<16} {}",
      base.reference.to_string(),
      format!("{} {}", base.config.runtime.name, base.config.runtime.version),
      truncate_hash(&base.digest.0)
    );
  }

  Ok(())
}
