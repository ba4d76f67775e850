use std::time::Instant;

use anyhow::{Context, Result};

use kiln_lib::gc::collect_garbage;
use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(store: &ImageStore, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let result = collect_garbage(store, dry_run).context("Garbage collection failed")?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Images removed", &result.stats.images_deleted.to_string());
    print_stat("Layers removed", &result.stats.layers_deleted.to_string());
    print_stat("Containers removed", &result.stats.containers_deleted.to_string());
    print_stat("Total removed", &result.stats.total_deleted().to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
