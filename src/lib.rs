//! # Imagetree Library
//!
//! This library provides the core functionality for building trees of
//! dependent container images out of their source repositories. It is
//! designed to be used by the `imagetree` command-line tool but can also
//! be embedded in other applications that need to orchestrate dependent
//! image builds.
//!
//! ## Quick Example
//!
//! ```
//! use imagetree::config;
//! use imagetree::recipe::Recipe;
//!
//! // Parse a build configuration
//! let config = config::parse(r#"
//! branches:
//!   dev:
//!     - https://github.com/dclong/docker-jupyterhub-ds
//! "#).unwrap();
//! assert_eq!(config.branches.len(), 1);
//!
//! // Parse a build recipe
//! let recipe = Recipe::parse(
//!     "# NAME: dclong/jupyterhub-ds\n\
//!      FROM dclong/python-portable:latest\n\
//!      ## GIT: https://github.com/dclong/docker-python-portable\n",
//!     "example",
//! ).unwrap();
//! assert!(!recipe.is_root());
//! ```
//!
//! ## Core Concepts
//!
//! The library is built around a few key concepts:
//!
//! - **Configuration (`config`)**: The YAML schema mapping branch names to
//!   the source repositories to build at that branch, plus run tunables.
//! - **Recipes (`recipe`)**: The directive lines inside each repository's
//!   `Dockerfile` that name the image and point at the base image's own
//!   source repository.
//! - **Source Management (`source`, `git`)**: Clone-once access to the
//!   source repositories, and the branch content comparison that decides
//!   when two branches are build-equivalent.
//! - **Graph (`graph`)**: The dependency DAG of build units, deduplicated
//!   across content-equivalent branches.
//! - **Driving (`driver`, `engine`, `retry`)**: Dependency-ordered
//!   execution of build, tag and push against an injected container
//!   engine, with bounded retry for registry operations.
//! - **Reporting (`report`)**: Per-vertex outcomes accumulated during a
//!   run and aggregated into a single error at the end.
//!
//! ## Execution Flow
//!
//! The `imagetree build` command executes the following high-level steps:
//!
//! 1.  **Configuration**: Load and validate the branch map.
//! 2.  **Resolution**: Walk each requested repository's base-image chain,
//!     cloning sources and parsing recipes, and fold the chains into a
//!     dependency graph, merging content-equivalent branches.
//! 3.  **Execution**: Build each root subtree on its own worker, parents
//!     strictly before children, applying derived and date-stamped tags
//!     and pushing them.
//! 4.  **Reporting**: Collect every vertex outcome; failures isolate to
//!     their subtree and surface as one aggregate error at the end.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod git;
pub mod graph;
pub mod image;
pub mod recipe;
pub mod report;
pub mod retry;
pub mod source;

#[cfg(test)]
mod tag_proptest;
