use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};

use kiln_lib::image::ImageRef;
use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, format_age, format_port, print_info, print_json, print_success, truncate_hash};

pub fn cmd_images(store: &ImageStore, output: OutputFormat) -> Result<()> {
  let images = store.list_images()?;

  let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
  for (tag, id) in store.list_tags()? {
    tags.entry(id.0).or_default().push(tag.to_string());
  }

  if output.is_json() {
    let list: Vec<_> = images
      .iter()
      .map(|image| {
        serde_json::json!({
          "id": image.id,
          "tags": tags.get(&image.id.0).cloned().unwrap_or_default(),
          "exposed_port": image.exposed_port(),
          "created_at_unix": image.created_at_unix,
        })
      })
      .collect();
    print_json(&list)?;
    return Ok(());
  }

  if images.is_empty() {
    print_info("No images. Run 'kiln build' to create one.");
    return Ok(());
  }

  println!("{:<30} {:<14} {:<7} CREATED", "TAG", "ID", "PORT");
  for image in &images {
    let tag = tags
      .get(&image.id.0)
      .map(|t| t.join(","))
      .unwrap_or_else(|| "<none>".to_string());
    let port = format_port(image.exposed_port());
    println!(
      "{:<30} {:<14} {:<7} {}",
      tag,
      truncate_hash(&image.id.0),
      port,
      format_age(image.created_at_unix)
    );
  }

  Ok(())
}

/// Remove a tag. The image stays until `kiln gc` finds it unreferenced.
pub fn cmd_untag(store: &ImageStore, reference: &str, output: OutputFormat) -> Result<()> {
  let reference = ImageRef::parse(reference).with_context(|| format!("Invalid image reference '{reference}'"))?;
  let Some(id) = store.tagged(&reference)? else {
    bail!("No image is tagged '{reference}'");
  };
  store.untag(&reference)?;

  if output.is_json() {
    print_json(&serde_json::json!({ "untagged": reference.to_string(), "id": id }))?;
  } else {
    print_success(&format!("Untagged {reference} ({})", truncate_hash(&id.0)));
  }
  Ok(())
}
