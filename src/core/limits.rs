//! Execution limits and the bounded step limiter.
//!
//! Every [`crate::core::Orchestrator`] owns a [`StepLimiter`] that caps how
//! many parallel or supervisor steps may invoke agents at the same time,
//! across every run the orchestrator executes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Engine-wide execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Concurrently executing parallel/supervisor steps (default: 10)
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Timeout for steps configured with 0 seconds (default: 60)
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout_seconds: u64,

    /// First retry delay in milliseconds (default: 500)
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    /// Retry delay cap in milliseconds (default: 10s)
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,
}

fn default_max_concurrent_steps() -> usize {
    10
}
fn default_step_timeout() -> u64 {
    60
}
fn default_retry_initial_delay() -> u64 {
    500
}
fn default_retry_max_delay() -> u64 {
    10_000
}
fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_steps: default_max_concurrent_steps(),
            default_step_timeout_seconds: default_step_timeout(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_backoff_multiplier: default_retry_backoff_multiplier(),
        }
    }
}

/// Counting limiter shared by all concurrent step executions of an engine.
///
/// Cloning shares the underlying permits.
#[derive(Debug, Clone)]
pub struct StepLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl StepLimiter {
    /// A limiter with `capacity` permits (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn from_limits(limits: &ExecutionLimits) -> Self {
        Self::new(limits.max_concurrent_steps)
    }

    /// Wait for a permit; it is released when dropped
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }
}

impl Default for StepLimiter {
    fn default() -> Self {
        Self::new(default_max_concurrent_steps())
    }
}
