use anyhow::Result;

use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, format_age, format_port, print_json, print_stat, print_success, symbols};

pub fn cmd_inspect(store: &ImageStore, query: &str, output: OutputFormat) -> Result<()> {
  let image = store.resolve_image(query)?;
  let tags: Vec<String> = store
    .list_tags()?
    .into_iter()
    .filter(|(_, id)| *id == image.id)
    .map(|(tag, _)| tag.to_string())
    .collect();

  if output.is_json() {
    print_json(&serde_json::json!({
      "id": image.id,
      "tags": tags,
      "created_at_unix": image.created_at_unix,
      "config": image.config,
    }))?;
    return Ok(());
  }

  let config = &image.config;
  print_success(&format!("Image {}", image.id));
  if !tags.is_empty() {
    print_stat("Tags", &tags.join(", "));
  }
  print_stat("Created", &format_age(image.created_at_unix));
  print_stat(
    "Base",
    &format!(
      "{} ({} {})",
      config.base.reference, config.base.runtime.name, config.base.runtime.version
    ),
  );
  print_stat("Workdir", config.workdir.as_str());
  print_stat("Exposed port", &format_port(config.exposed_port));
  print_stat("Command", &config.start_command.to_string());

  if !config.env.is_empty() {
    println!();
    println!("Env:");
    for (key, value) in &config.env {
      println!("  {}={}", key, value);
    }
  }

  println!();
  println!("Layers:");
  for layer in &config.layers {
    println!("  {} {} {}", symbols::INFO, &layer.id.0, layer.describe());
  }

  Ok(())
}
