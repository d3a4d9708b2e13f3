//! Shell-out Git primitives.
//!
//! This uses the system git command, which automatically handles:
//! - SSH keys from ~/.ssh/
//! - Git credential helpers
//! - Personal access tokens
//! - Any authentication configured in ~/.gitconfig
//!
//! Clones are full clones: the identity resolution in [`crate::graph`]
//! diffs arbitrary branch pairs of one clone, so every branch must be
//! present locally.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use crate::error::{Error, Result};

/// Clone a repository into `dest`.
pub fn clone(url: &str, dest: &Path) -> Result<()> {
    // git won't clone into an existing non-empty dir
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let output = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .map_err(|e| Error::GitClone {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Provide helpful error message for common auth failures
        let message = if stderr.contains("Authentication failed")
            || stderr.contains("Permission denied")
            || stderr.contains("Could not read from remote repository")
        {
            format!(
                "Authentication failed. Make sure you have access to the repository.\n\
                For private repos, ensure you have:\n\
                - SSH key added to ssh-agent\n\
                - Git credentials configured\n\
                - Personal access token set up\n\
                Error: {}",
                stderr
            )
        } else {
            stderr.to_string()
        };

        return Err(Error::GitClone {
            url: url.to_string(),
            message,
        });
    }

    Ok(())
}

/// Check out a branch in a local clone, discarding local modifications.
pub fn checkout(workdir: &Path, branch: &str) -> Result<()> {
    run_git(workdir, &["checkout", "--force", branch]).map(|_| ())
}

/// Check out `branch`, falling back to creating it from `fallback` when
/// the repository does not have the requested branch.
pub fn checkout_or_create(workdir: &Path, branch: &str, fallback: &str) -> Result<()> {
    if checkout(workdir, branch).is_ok() {
        return Ok(());
    }
    checkout(workdir, fallback)?;
    run_git(workdir, &["checkout", "--force", "-b", branch]).map(|_| ())
}

/// Compare two branches of a local clone, ignoring the given paths.
///
/// Returns `true` when the branches differ. Exclusions use git pathspec
/// magic (`:(exclude)<path>`), matching the diff the identity resolver
/// needs: branches whose only differences are in excluded directories
/// count as identical.
pub fn diff_branches(workdir: &Path, a: &str, b: &str, exclude: &[String]) -> Result<bool> {
    let range = format!("{}..{}", a, b);
    let mut args: Vec<String> = vec!["diff".to_string(), range, "--".to_string(), ".".to_string()];
    for path in exclude {
        args.push(format!(":(exclude){}", path));
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let output = run_git(workdir, &arg_refs)?;
    Ok(!output.stdout.is_empty())
}

/// Run a git command with `-C <workdir>` and return its output, mapping
/// non-zero exits to [`Error::GitCommand`].
fn run_git(workdir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(args)
        .output()
        .map_err(|e| Error::GitCommand {
            command: args.join(" "),
            repo: workdir.display().to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::GitCommand {
            command: args.join(" "),
            repo: workdir.display().to_string(),
            stderr: stderr.to_string(),
        });
    }

    Ok(output)
}
