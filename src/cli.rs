//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Imagetree - Build trees of dependent container images
#[derive(Parser, Debug)]
#[command(name = "imagetree")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build, tag and push the images of a configuration
    Build(commands::build::BuildArgs),

    /// Resolve the dependency graph and print it without building
    Graph(commands::graph::GraphArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.log_level.as_str()),
        )
        .format_timestamp_secs()
        .init();

        match self.command {
            Commands::Build(args) => commands::build::execute(args),
            Commands::Graph(args) => commands::graph::execute(args),
        }
    }
}
