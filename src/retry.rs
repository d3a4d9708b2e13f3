//! Bounded retry for registry operations.
//!
//! Push and pull go over the network and fail transiently; the driver
//! wraps each one in [`retry`] with a fixed attempt count and a fixed
//! delay between attempts. Non-transient failures (a failed build, bad
//! credentials) propagate immediately without sleeping, and the final
//! attempt's outcome is returned unmodified either way.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::engine::{EngineError, EngineResult};

/// Fixed retry parameters for one class of operations.
///
/// The count and delay are fixed per call site, not adaptive: a push
/// that fails three times a minute apart is treated as failed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one. Clamped to at
    /// least 1.
    pub attempts: u32,
    /// Delay between consecutive tries.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// Invoke `operation` under `policy`.
///
/// `what` names the operation for log messages only. The closure takes
/// no arguments; callers pass operation parameters through an explicit
/// argument struct captured by value, never through a loop variable.
pub fn retry<T, F>(policy: RetryPolicy, what: &str, mut operation: F) -> EngineResult<T>
where
    F: FnMut() -> EngineResult<T>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.transient || attempt >= attempts {
                    return Err(error);
                }
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what, attempt, attempts, policy.backoff, error
                );
                thread::sleep(policy.backoff);
            }
        }
    }
}
