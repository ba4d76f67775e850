use anyhow::Result;

use kiln_lib::platform::platform_triple;
use kiln_lib::store::ImageStore;

use crate::output::{OutputFormat, print_json, print_stat};

pub fn cmd_info(store: &ImageStore, output: OutputFormat) -> Result<()> {
  let platform = platform_triple();
  let bases = store.list_bases()?.len();
  let images = store.list_images()?.len();
  let layers = store.list_layers()?.len();

  if output.is_json() {
    print_json(&serde_json::json!({
      "version": env!("CARGO_PKG_VERSION"),
      "platform": platform,
      "store": store.root(),
      "bases": bases,
      "images": images,
      "layers": layers,
    }))?;
    return Ok(());
  }

  println!("kiln {}", env!("CARGO_PKG_VERSION"));
  match platform {
    Some(triple) => print_stat("Platform", &triple),
    None => print_stat("Platform", "unknown"),
  }
  print_stat("Store", &store.root().display().to_string());
  print_stat("Bases", &bases.to_string());
  print_stat("Images", &images.to_string());
  print_stat("Layers", &layers.to_string());

  Ok(())
}
