//! # Configuration Schema and Parsing
//!
//! The build configuration is a YAML file with two sections:
//!
//! ```yaml
//! branches:
//!   dev:
//!     - https://github.com/dclong/docker-jupyterhub-ds
//!   main:
//!     - https://github.com/dclong/docker-python-portable
//! options:
//!   push: true
//!   branch_fallback: dev
//! ```
//!
//! `branches` maps a branch name to the source repositories to build at
//! that branch; `options` tunes the run and may be omitted entirely.
//!
//! Callers that already hold the branch map in memory use
//! [`ConfigSource::Inline`]; the variant is resolved into a
//! [`BuildConfig`] exactly once at the boundary, so the rest of the code
//! never deals with file-or-mapping polymorphism.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Branch name mapped to the source repositories to build at that branch.
///
/// A `BTreeMap` keeps graph construction order deterministic.
pub type BranchUrls = BTreeMap<String, Vec<String>>;

/// Tunables for a build run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Tag to build instead of the branch-derived one. `None` derives the
    /// tag from each vertex's branch; an empty string means `latest`.
    #[serde(default)]
    pub tag_build: Option<String>,

    /// Push built images and all their tags to the registry.
    #[serde(default = "default_push")]
    pub push: bool,

    /// Remove local images of a subtree once the whole subtree has been
    /// processed.
    #[serde(default)]
    pub remove: bool,

    /// Branch to create a requested branch from when a repository does
    /// not have it.
    #[serde(default = "default_branch_fallback")]
    pub branch_fallback: String,

    /// Paths excluded from the branch content comparison that decides
    /// whether two branches are build-equivalent.
    #[serde(default = "default_diff_excludes")]
    pub diff_excludes: Vec<String>,

    /// Total push/pull tries per tag, including the first one.
    #[serde(default = "default_push_attempts")]
    pub push_attempts: u32,

    /// Seconds to wait between push/pull tries.
    #[serde(default = "default_push_backoff_secs")]
    pub push_backoff_secs: u64,
}

fn default_push() -> bool {
    true
}

fn default_branch_fallback() -> String {
    "dev".to_string()
}

fn default_diff_excludes() -> Vec<String> {
    vec!["test".to_string(), "tests".to_string()]
}

fn default_push_attempts() -> u32 {
    3
}

fn default_push_backoff_secs() -> u64 {
    60
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            tag_build: None,
            push: default_push(),
            remove: false,
            branch_fallback: default_branch_fallback(),
            diff_excludes: default_diff_excludes(),
            push_attempts: default_push_attempts(),
            push_backoff_secs: default_push_backoff_secs(),
        }
    }
}

/// Parsed build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Branch name to source repository URLs.
    pub branches: BranchUrls,
    /// Run tunables; every field has a default.
    #[serde(default)]
    pub options: BuildOptions,
}

/// Where a build configuration comes from.
///
/// Resolved once at the boundary into a [`BuildConfig`].
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Load and parse a YAML file.
    File(PathBuf),
    /// Use an already-in-memory branch map with default options.
    Inline(BranchUrls),
}

impl ConfigSource {
    pub fn resolve(self) -> Result<BuildConfig> {
        match self {
            ConfigSource::File(path) => from_file(&path),
            ConfigSource::Inline(branches) => {
                let config = BuildConfig {
                    branches,
                    options: BuildOptions::default(),
                };
                validate(&config)?;
                Ok(config)
            }
        }
    }
}

/// Parse a YAML configuration string.
pub fn parse(yaml: &str) -> Result<BuildConfig> {
    let config: BuildConfig = serde_yaml::from_str(yaml).map_err(|e| Error::ConfigParse {
        message: e.to_string(),
        hint: Some(
            "expected a 'branches:' mapping of branch name to a list of repository URLs"
                .to_string(),
        ),
    })?;
    validate(&config)?;
    Ok(config)
}

/// Load and parse a YAML configuration file.
pub fn from_file(path: &std::path::Path) -> Result<BuildConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigParse {
        message: format!("cannot read {}: {}", path.display(), e),
        hint: None,
    })?;
    parse(&content)
}

fn validate(config: &BuildConfig) -> Result<()> {
    if config.branches.is_empty() {
        return Err(Error::ConfigParse {
            message: "the 'branches' section is empty".to_string(),
            hint: Some("list at least one branch with at least one repository URL".to_string()),
        });
    }
    for (branch, urls) in &config.branches {
        if branch.is_empty() {
            return Err(Error::ConfigParse {
                message: "a branch name is empty".to_string(),
                hint: None,
            });
        }
        if urls.is_empty() {
            return Err(Error::ConfigParse {
                message: format!("branch '{}' has no repository URLs", branch),
                hint: Some("remove the branch or list the repositories to build".to_string()),
            });
        }
    }
    Ok(())
}
