//! # Build Command Implementation
//!
//! This module implements the `build` subcommand, which loads a build
//! configuration, resolves the dependency graph of the requested images
//! and drives the container engine over it.
//!
//! ## Functionality
//!
//! - **Graph Resolution**: Source repositories are cloned, their recipes
//!   parsed and the base-image chains folded into a dependency graph,
//!   merging branches with identical content.
//!
//! - **Execution**: Each root subtree is built on its own worker in
//!   dependency order; built images are tagged with their derived and
//!   date-stamped tags and pushed unless `--no-push` is given.
//!
//! - **Reporting**: A per-image summary is printed (as text or JSON with
//!   `--format`), and the command exits non-zero when any image failed.
//!
//! With `--dry-run` the command stops after resolution and only prints
//! the build order, which makes it a cheap preflight for a configuration
//! change.

use anyhow::Result;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

use imagetree::config::ConfigSource;
use imagetree::driver::BuildDriver;
use imagetree::engine::DockerEngine;
use imagetree::graph::GraphBuilder;
use imagetree::source::SourceManager;

/// Output format of the run report.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Build the images of a configuration in dependency order
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Path to the build configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "imagetree.yaml")]
    pub config: PathBuf,

    /// Build this tag instead of the branch-derived one. An empty string
    /// means `latest`.
    #[arg(short, long, value_name = "TAG")]
    pub tag: Option<String>,

    /// Do not push built images to their registries.
    #[arg(long)]
    pub no_push: bool,

    /// Remove local images once their whole subtree has been processed.
    #[arg(long)]
    pub remove: bool,

    /// Branch to create a requested branch from when a repository does
    /// not have it.
    #[arg(long, value_name = "BRANCH")]
    pub branch_fallback: Option<String>,

    /// Path excluded from the branch content comparison (repeatable).
    /// Overrides the configuration's exclude list when given.
    #[arg(long = "diff-exclude", value_name = "PATH")]
    pub diff_excludes: Vec<String>,

    /// Report format.
    #[arg(long, value_name = "FORMAT", value_enum, default_value = "text")]
    pub format: ReportFormat,

    /// Resolve the dependency graph and print the build order without
    /// building anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the `build` command.
pub fn execute(args: BuildArgs) -> Result<()> {
    if !args.config.exists() {
        anyhow::bail!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }
    let mut config = ConfigSource::File(args.config.clone()).resolve()?;

    // command-line flags win over the configuration file
    if let Some(tag) = args.tag {
        config.options.tag_build = Some(tag);
    }
    if args.no_push {
        config.options.push = false;
    }
    if args.remove {
        config.options.remove = true;
    }
    if let Some(branch) = args.branch_fallback {
        config.options.branch_fallback = branch;
    }
    if !args.diff_excludes.is_empty() {
        config.options.diff_excludes = args.diff_excludes;
    }

    let sources = SourceManager::new()?;
    let mut builder = GraphBuilder::new(&sources, &config.options);
    builder.add_all(&config.branches)?;
    let graph = builder.finish();

    if args.dry_run {
        for id in graph.build_order() {
            println!("{}", graph.vertex(id).source);
        }
        return Ok(());
    }

    let engine = DockerEngine::new();
    let driver = BuildDriver::new(&graph, &sources, &engine, &config.options);
    let report = driver.run()?;

    match args.format {
        ReportFormat::Text => println!("{}", report.summary()),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }
    if let Some(error) = report.aggregate_error() {
        return Err(error.into());
    }
    Ok(())
}
