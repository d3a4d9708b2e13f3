//! # Graph Command Implementation
//!
//! This module implements the `graph` subcommand, which resolves the
//! dependency graph of a build configuration and dumps it as YAML
//! without building anything.
//!
//! Resolution still clones the source repositories and compares branch
//! content, so the dump reflects exactly the deduplicated graph a
//! subsequent `build` would execute.

use anyhow::Result;
use clap::Args;
use std::fs;
use std::path::PathBuf;

use imagetree::config::ConfigSource;
use imagetree::graph::GraphBuilder;
use imagetree::source::SourceManager;

/// Print the resolved dependency graph of a configuration
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Path to the build configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "imagetree.yaml")]
    pub config: PathBuf,

    /// Write the YAML dump to a file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Execute the `graph` command.
pub fn execute(args: GraphArgs) -> Result<()> {
    if !args.config.exists() {
        anyhow::bail!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }
    let config = ConfigSource::File(args.config).resolve()?;

    let sources = SourceManager::new()?;
    let mut builder = GraphBuilder::new(&sources, &config.options);
    builder.add_all(&config.branches)?;
    let yaml = builder.finish().to_yaml()?;

    match args.output {
        Some(path) => fs::write(&path, yaml)?,
        None => print!("{}", yaml),
    }
    Ok(())
}
