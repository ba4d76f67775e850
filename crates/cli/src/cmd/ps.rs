use anyhow::Result;

use kiln_lib::container::refresh;
use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, format_age, format_port, print_info, print_json, truncate_hash};

pub fn cmd_ps(store: &ImageStore, all: bool, output: OutputFormat) -> Result<()> {
  let mut records = Vec::new();
  for record in store.list_containers()? {
    let record = refresh(store, record)?;
    if all || !record.state.is_finished() {
      records.push(record);
    }
  }

  if output.is_json() {
    print_json(&records)?;
    return Ok(());
  }

  if records.is_empty() {
    print_info(if all { "No containers." } else { "No running containers." });
    return Ok(());
  }

  println!("{:<14} {:<14} {:<7} {:<24} CREATED", "CONTAINER", "IMAGE", "PORT", "STATE");
  for record in &records {
    let port = format_port(record.port);
    println!(
      "{:<14} {:<14} {:<7} {:<24} {}",
      record.name.as_deref().unwrap_or(&record.id),
      truncate_hash(&record.image_id.0),
      port,
      record.state.to_string(),
      format_age(record.created_at_unix)
    );
  }

  Ok(())
}
