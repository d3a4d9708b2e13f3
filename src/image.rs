//! Identity of a single build unit and branch/tag naming rules.
//!
//! An [`ImageSource`] names one build unit: a source repository plus the
//! branch to build from. Two sources with equal fields are the same
//! *candidate*; whether they end up as the same graph vertex is decided
//! by the content-based identity resolution in [`crate::graph`].
//!
//! This module also owns the branch-to-tag mapping used when tagging
//! built images: `master`/`main` map to `latest`, `dev` maps to `next`,
//! and every other branch maps to its own name. Historical tags carry an
//! `MMDDHH` date suffix.

use std::fmt;

use chrono::Local;
use serde::Serialize;

/// One build unit: a source repository URL plus the branch to build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageSource {
    /// Remote repository URL, normalized (no trailing `.git`).
    pub url: String,
    /// Branch requested for this build unit.
    pub branch: String,
}

impl ImageSource {
    /// Create a source, stripping a trailing `.git` from the URL so that
    /// `https://host/owner/repo` and `https://host/owner/repo.git` denote
    /// the same repository.
    pub fn new(url: &str, branch: &str) -> Self {
        let url = url.trim().strip_suffix(".git").unwrap_or(url.trim());
        Self {
            url: url.to_string(),
            branch: branch.to_string(),
        }
    }
}

impl fmt::Display for ImageSource {
    /// Short form `owner/repo<branch>`, handling both HTTPS URLs
    /// (`https://github.com/owner/repo`) and scp-style SSH URLs
    /// (`git@github.com:owner/repo`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", short_repo_name(&self.url), self.branch)
    }
}

/// Strip a repository URL down to its last two path components.
fn short_repo_name(url: &str) -> &str {
    let url = url.trim_end_matches('/');
    let Some(rindex) = url.rfind('/') else {
        return url;
    };
    let head = &url[..rindex];
    match head.rfind('/').or_else(|| head.rfind(':')) {
        Some(index) => &url[index + 1..],
        None => url,
    }
}

/// Map a branch name to its corresponding image tag.
///
/// `master` and `main` map to `latest`, `dev` maps to `next`, any other
/// branch maps to itself.
pub fn branch_to_tag(branch: &str) -> String {
    match branch {
        "master" | "main" => "latest".to_string(),
        "dev" => "next".to_string(),
        other => other.to_string(),
    }
}

/// Suffix a tag with the current date as a 6-digit `MMDDHH` stamp.
///
/// The empty tag and `latest` map to the bare stamp so that the
/// historical tag of a `latest` build is just the date.
pub fn date_tag(tag: &str) -> String {
    let stamp = Local::now().format("%m%d%H").to_string();
    if tag.is_empty() || tag == "latest" {
        stamp
    } else {
        format!("{}_{}", tag, stamp)
    }
}

/// Resolve the tag to build for a vertex.
///
/// `None` derives the tag from the branch name, an explicit empty string
/// is treated as `latest`, anything else is used verbatim.
pub fn resolve_build_tag(tag_build: Option<&str>, branch: &str) -> String {
    match tag_build {
        None => branch_to_tag(branch),
        Some("") => "latest".to_string(),
        Some(tag) => tag.to_string(),
    }
}
