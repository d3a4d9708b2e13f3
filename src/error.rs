//! # Error Handling
//!
//! Centralized error type for the `imagetree` application, built with
//! `thiserror`. The variants follow the failure taxonomy of the build
//! pipeline:
//!
//! - Configuration parsing errors (`ConfigParse`).
//! - Git clone and command failures (`GitClone`, `GitCommand`).
//! - Malformed or missing build recipes (`Descriptor`) — fatal to the
//!   whole lineage being resolved, since a broken ancestor makes every
//!   descendant unbuildable.
//! - Internal graph inconsistencies (`Consistency`) — indicate a logic
//!   defect in the graph builder and are never retried.
//! - Image engine failures (`Engine`) — build/tag/push/pull errors from
//!   the underlying container engine.
//! - The end-of-run aggregate (`BuildFailed`) enumerating every vertex
//!   whose build, tagging or push failed.
//!
//! Per-vertex build failures during traversal are *not* represented as
//! errors; they are recorded in the build report and only surface as a
//! single `BuildFailed` once the traversal has finished. Errors raised
//! during graph construction propagate immediately since no meaningful
//! graph can be built from broken metadata.

use thiserror::Error;

use crate::engine::EngineError;

/// One failed build vertex inside an [`Error::BuildFailed`] aggregate.
#[derive(Debug, Clone)]
pub struct VertexFailure {
    /// Short display name of the vertex, e.g. `dclong/docker-jupyterhub-ds<dev>`.
    pub node: String,
    /// Branches recorded as content-equivalent to the vertex's branch.
    pub equivalent_branches: Vec<String>,
    /// Captured error text (build log tail, engine stderr, ...).
    pub message: String,
}

fn render_failures(failures: &[VertexFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} {:?}:\n{}", f.node, f.equivalent_branches, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Main error type for imagetree operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error occurred while parsing the build configuration file.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An error occurred while cloning a Git repository.
    #[error("Git clone error for {url}: {message}")]
    GitClone { url: String, message: String },

    /// An error occurred while executing a Git command against a local clone.
    #[error("Git command failed in {repo}: {command} - {stderr}")]
    GitCommand {
        command: String,
        repo: String,
        stderr: String,
    },

    /// A build recipe is missing or malformed.
    ///
    /// `origin` names the (repository, branch) whose recipe failed to parse.
    #[error("Build recipe error for {origin}: {message}")]
    Descriptor { origin: String, message: String },

    /// An expected vertex is missing from the dependency graph.
    ///
    /// This indicates a defect in the graph builder itself, not in the
    /// user's input, and is never retried.
    #[error("Graph consistency error: {message}")]
    Consistency { message: String },

    /// An image engine operation failed outside the per-vertex build path
    /// (e.g. registry login before the build phase starts).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// One or more vertices failed during a build run.
    ///
    /// Raised once at the end of a run; every failed vertex is listed with
    /// its equivalent-branch set and captured error text.
    #[error("failed to build images for {} node(s):\n{}", .failures.len(), render_failures(.failures))]
    BuildFailed { failures: Vec<VertexFailure> },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
