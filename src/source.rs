//! # Source Repository Access
//!
//! The [`SourceManager`] owns the local working trees of every source
//! repository touched by a build run. Working trees live under a single
//! temp directory and are discarded when the manager is dropped; nothing
//! is persisted between runs.
//!
//! ## Design
//!
//! Git access goes through the [`VcsOperations`] trait so that tests can
//! substitute a scripted implementation instead of shelling out to git.
//! The default implementation wraps the functions in [`crate::git`].
//!
//! ## Sharing
//!
//! Each repository URL is cloned exactly once; subsequent requests reuse
//! the same working tree. The clone map lock is held across the clone
//! itself, which serializes concurrent first-clones of the same URL:
//! the first requester clones, later requesters find the entry. During
//! the (parallel) build phase a per-repository lock from
//! [`SourceManager::repo_lock`] must be held around any
//! checkout-and-build sequence, because checking out a branch mutates
//! the shared working tree.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use tempfile::TempDir;

use crate::error::{Error, Result};

/// Trait for version-control operations - allows mocking in tests
pub trait VcsOperations: Send + Sync {
    /// Clone a repository into `dest`.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;

    /// Check out `branch` in a local clone, creating it from `fallback`
    /// when the repository has no such branch.
    fn checkout(&self, workdir: &Path, branch: &str, fallback: &str) -> Result<()>;

    /// Whether two branches of a local clone differ, ignoring `exclude`
    /// paths. Returns `true` when content differs.
    fn branches_differ(
        &self,
        workdir: &Path,
        a: &str,
        b: &str,
        exclude: &[String],
    ) -> Result<bool>;
}

/// The default implementation of [`VcsOperations`], which uses the
/// system's `git` command.
pub struct DefaultVcsOperations;

impl VcsOperations for DefaultVcsOperations {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        crate::git::clone(url, dest)
    }

    fn checkout(&self, workdir: &Path, branch: &str, fallback: &str) -> Result<()> {
        crate::git::checkout_or_create(workdir, branch, fallback)
    }

    fn branches_differ(
        &self,
        workdir: &Path,
        a: &str,
        b: &str,
        exclude: &[String],
    ) -> Result<bool> {
        crate::git::diff_branches(workdir, a, b, exclude)
    }
}

/// Clone-path cache and checkout front-end for source repositories.
pub struct SourceManager {
    vcs: Box<dyn VcsOperations>,
    root: TempDir,
    clones: Mutex<HashMap<String, PathBuf>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceManager {
    /// Create a manager using the system git command.
    pub fn new() -> Result<Self> {
        Self::with_operations(Box::new(DefaultVcsOperations))
    }

    /// Create a manager with custom [`VcsOperations`].
    ///
    /// This is primarily used for testing to inject mock operations.
    pub fn with_operations(vcs: Box<dyn VcsOperations>) -> Result<Self> {
        Ok(Self {
            vcs,
            root: TempDir::new()?,
            clones: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Clone (once) and check out a repository at the requested branch,
    /// creating the branch from `fallback` when it does not exist.
    /// Returns the path of the shared working tree.
    pub fn checkout_source(&self, url: &str, branch: &str, fallback: &str) -> Result<PathBuf> {
        let path = {
            let mut clones = self.clones.lock().map_err(|_| Error::LockPoisoned {
                context: "source clone map".to_string(),
            })?;
            match clones.get(url) {
                Some(path) => {
                    debug!("{} has already been cloned into {}", url, path.display());
                    path.clone()
                }
                None => {
                    let dest = self.root.path().join(clone_dir_name(url));
                    info!("Cloning {} into {}", url, dest.display());
                    self.vcs.clone_repo(url, &dest)?;
                    clones.insert(url.to_string(), dest.clone());
                    dest
                }
            }
        };
        self.vcs.checkout(&path, branch, fallback)?;
        Ok(path)
    }

    /// The working tree of an already-cloned repository, if any.
    pub fn workdir(&self, url: &str) -> Result<Option<PathBuf>> {
        let clones = self.clones.lock().map_err(|_| Error::LockPoisoned {
            context: "source clone map".to_string(),
        })?;
        Ok(clones.get(url).cloned())
    }

    /// Per-repository lock guarding mutation of the shared working tree.
    ///
    /// Build steps check out a branch and rewrite the recipe's base tag
    /// before invoking the engine; holders of this lock may do so without
    /// racing a sibling subtree that shares the repository.
    pub fn repo_lock(&self, url: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| Error::LockPoisoned {
            context: "source lock map".to_string(),
        })?;
        Ok(locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Whether two branches of a repository have identical content for
    /// build purposes, ignoring the `exclude` paths.
    ///
    /// The repository must already have been cloned through
    /// [`checkout_source`](Self::checkout_source); asking about an
    /// unknown repository is a consistency fault.
    pub fn branches_identical(
        &self,
        url: &str,
        a: &str,
        b: &str,
        exclude: &[String],
    ) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let workdir = self.workdir(url)?.ok_or_else(|| Error::Consistency {
            message: format!("repository {} has not been cloned yet", url),
        })?;
        debug!("Comparing branches {} and {} of {}", a, b, url);
        Ok(!self.vcs.branches_differ(&workdir, a, b, exclude)?)
    }
}

/// Filesystem-safe directory name for a repository clone.
fn clone_dir_name(url: &str) -> String {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    let tail = url.rsplit(['/', ':']).next().unwrap_or("repo");
    format!("{}-{:x}", tail, hasher.finish())
}
