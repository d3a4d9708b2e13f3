//! Shared helpers for the end-to-end CLI tests.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

/// Run a git command in `dir`, panicking on failure. Commits are made
/// with a throwaway identity so the tests do not depend on the host's
/// git configuration.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=e2e", "-c", "user.email=e2e@example.com"])
        .args(args)
        .status()
        .expect("failed to run git");
    assert!(status.success(), "git {:?} failed in {}", args, dir.display());
}

/// Create a local git repository with a single committed `Dockerfile` on
/// the `dev` branch, usable as a clone source in configurations.
pub fn recipe_repo(dir: &Path, recipe: &str) {
    git(dir, &["init", "--quiet"]);
    git(dir, &["checkout", "--quiet", "-b", "dev"]);
    std::fs::write(dir.join("Dockerfile"), recipe).unwrap();
    git(dir, &["add", "Dockerfile"]);
    git(dir, &["commit", "--quiet", "-m", "add recipe"]);
}
