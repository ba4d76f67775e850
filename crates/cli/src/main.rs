mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::store::ImageStore;

use crate::cmd::{
  cmd_base_add, cmd_base_list, cmd_build, cmd_gc, cmd_images, cmd_info, cmd_inspect, cmd_ps, cmd_run,
  cmd_untag,
};
use crate::output::OutputFormat;

/// kiln - build service images from a source tree and run them
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build an image from a descriptor
  Build {
    /// Build context copy sources are resolved against
    #[arg(default_value = ".")]
    context: PathBuf,

    /// Descriptor file (default: <context>/kiln.lua)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Tag for the image, overriding the descriptor's
    #[arg(short, long)]
    tag: Option<String>,
  },

  /// Start a container from an image and wait for it to exit
  Run {
    /// Image tag or id prefix
    image: String,

    /// Extra environment variables
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Name recorded with the container
    #[arg(long)]
    name: Option<String>,
  },

  /// Show an image's configuration
  Inspect {
    /// Image tag or id prefix
    image: String,
  },

  /// List built images
  Images,

  /// Remove a tag from an image
  Untag {
    /// Tag to remove, e.g. meeting-minutes:latest
    reference: String,
  },

  /// List containers
  Ps {
    /// Include finished containers
    #[arg(short, long)]
    all: bool,
  },

  /// Manage base images
  Base {
    #[command(subcommand)]
    command: BaseCommands,
  },

  /// Remove unreferenced images, layers and finished containers
  Gc {
    /// Show what would be removed without deleting
    #[arg(long)]
    dry_run: bool,
  },

  /// Show platform and store information
  Info,
}

#[derive(Subcommand)]
enum BaseCommands {
  /// Register a directory holding base.json and rootfs/ as a base image
  Add {
    /// Reference to register, e.g. python:3.10
    reference: String,

    /// Directory containing base.json
    dir: PathBuf,
  },

  /// List registered base images
  List,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_filter = if cli.verbose {
    "kiln_lib=debug,kiln_cli=debug,info"
  } else {
    "kiln_lib=info,warn"
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let store = ImageStore::default_store();
  let output = cli.output;

  match cli.command {
    Commands::Build { context, file, tag } => cmd_build(&store, &context, file.as_deref(), tag.as_deref(), output),
    Commands::Run { image, env, name } => {
      let code = cmd_run(&store, &image, &env, name, output)?;
      if code != 0 {
        std::process::exit(code);
      }
      Ok(())
    }
    Commands::Inspect { image } => cmd_inspect(&store, &image, output),
    Commands::Images => cmd_images(&store, output),
    Commands::Untag { reference } => cmd_untag(&store, &reference, output),
    Commands::Ps { all } => cmd_ps(&store, all, output),
    Commands::Base { command } => match command {
      BaseCommands::Add { reference, dir } => cmd_base_add(&store, &reference, &dir, output),
      BaseCommands::List => cmd_base_list(&store, output),
    },
    Commands::Gc { dry_run } => cmd_gc(&store, dry_run, output),
    Commands::Info => cmd_info(&store, output),
  }
}
