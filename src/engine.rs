//! # Image Engine Interface
//!
//! The build driver talks to the container engine through the
//! [`ImageEngine`] trait, which is explicitly injected — there is no
//! process-wide engine singleton. The production implementation,
//! [`DockerEngine`], shells out to the `docker` CLI; tests substitute a
//! mock.
//!
//! Engine failures carry a `transient` flag: network-ish push/pull
//! failures are transient and eligible for the bounded retry in
//! [`crate::retry`], while build errors and authentication failures are
//! not and propagate immediately.

use std::path::Path;
use std::process::Command;

use log::{debug, info};
use thiserror::Error;

/// A failed image engine operation.
#[derive(Error, Debug, Clone)]
#[error("docker {operation} failed for {image}: {message}")]
pub struct EngineError {
    /// Operation that failed: `build`, `tag`, `push`, `pull`, `rmi`, `login`.
    pub operation: String,
    /// Image reference the operation was applied to.
    pub image: String,
    /// Captured log or stderr of the failed command.
    pub message: String,
    /// Whether retrying the operation may succeed.
    pub transient: bool,
}

/// A convenient alias for engine operation results.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Operations the build driver needs from a container image engine.
pub trait ImageEngine: Send + Sync {
    /// Build `image:tag` from the recipe in `context`. `pull_base`
    /// requests refreshing the base image from its registry; the driver
    /// sets it only for root images, since every other base was just
    /// built locally.
    fn build(&self, context: &Path, image: &str, tag: &str, pull_base: bool) -> EngineResult<()>;

    /// Apply an additional tag to an already-built image.
    fn tag(&self, image: &str, tag: &str, new_tag: &str) -> EngineResult<()>;

    /// Push one tag of an image to its registry.
    fn push(&self, image: &str, tag: &str) -> EngineResult<()>;

    /// Pull one tag of an image from its registry.
    fn pull(&self, image: &str, tag: &str) -> EngineResult<()>;

    /// Remove a local tag of an image.
    fn remove(&self, image: &str, tag: &str) -> EngineResult<()>;

    /// Log in to a third-party registry host, relying on the engine's
    /// configured credential store.
    fn login(&self, host: &str) -> EngineResult<()>;
}

/// [`ImageEngine`] implementation shelling out to the `docker` CLI.
pub struct DockerEngine {
    program: String,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    fn run(&self, operation: &str, image: &str, args: &[&str], transient: bool) -> EngineResult<()> {
        debug!("Running command: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| EngineError {
                operation: operation.to_string(),
                image: image.to_string(),
                message: e.to_string(),
                transient: false,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(EngineError {
                operation: operation.to_string(),
                image: image.to_string(),
                transient: transient && !is_auth_failure(&stderr),
                message: stderr,
            });
        }
        Ok(())
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageEngine for DockerEngine {
    fn build(&self, context: &Path, image: &str, tag: &str, pull_base: bool) -> EngineResult<()> {
        let reference = format!("{}:{}", image, tag);
        info!("Building the image {} ...", reference);
        let context = context.display().to_string();
        let mut args = vec!["build", "--rm", "-t", &reference];
        if pull_base {
            args.push("--pull");
        }
        args.push(&context);

        // a failed build's log is the error message, so capture combined output
        debug!("Running command: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| EngineError {
                operation: "build".to_string(),
                image: reference.clone(),
                message: e.to_string(),
                transient: false,
            })?;

        if !output.status.success() {
            let mut log = String::from_utf8_lossy(&output.stdout).to_string();
            log.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(EngineError {
                operation: "build".to_string(),
                image: reference,
                message: log,
                transient: false,
            });
        }
        Ok(())
    }

    fn tag(&self, image: &str, tag: &str, new_tag: &str) -> EngineResult<()> {
        let source = format!("{}:{}", image, tag);
        let target = format!("{}:{}", image, new_tag);
        self.run("tag", &target, &["tag", &source, &target], false)
    }

    fn push(&self, image: &str, tag: &str) -> EngineResult<()> {
        let reference = format!("{}:{}", image, tag);
        info!("Pushing the image {} ...", reference);
        self.run("push", &reference, &["push", &reference], true)
    }

    fn pull(&self, image: &str, tag: &str) -> EngineResult<()> {
        let reference = format!("{}:{}", image, tag);
        info!("Pulling the image {} ...", reference);
        self.run("pull", &reference, &["pull", &reference], true)
    }

    fn remove(&self, image: &str, tag: &str) -> EngineResult<()> {
        let reference = format!("{}:{}", image, tag);
        info!("Removing the image {} ...", reference);
        self.run("rmi", &reference, &["rmi", "--force", &reference], false)
    }

    fn login(&self, host: &str) -> EngineResult<()> {
        info!("Logging in to registry {} ...", host);
        self.run("login", host, &["login", host], false)
    }
}

/// Registry responses that indicate bad credentials rather than a
/// transient network problem.
fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("denied")
        || message.contains("unauthorized")
        || message.contains("authentication required")
}
