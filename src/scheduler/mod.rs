//! Background task scheduling: priority queue, bounded concurrency and
//! idle-deferred low-priority work.

pub mod engine;
pub mod idle;
pub mod queue;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export common types
pub use self::engine::{SchedulerStatus, TaskHandle, TaskScheduler};
pub use self::idle::{IdleDeadline, IdleExecutor, IdleMode, ImmediateIdle, NativeIdle};
pub use self::queue::Priority;

/// Why a task's completion carries no value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled by the runtime")]
    Aborted,

    #[error("task was discarded before it ran")]
    Discarded,
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on tasks in flight at once.
    pub max_concurrent: usize,
    /// Pause between a task finishing and the next selection.
    pub drain_delay_ms: u64,
    /// Longest a low-priority task waits for an idle window.
    pub idle_timeout_ms: u64,
    /// Idle provider installed at startup.
    pub idle: IdleMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            drain_delay_ms: 10,
            idle_timeout_ms: 5000,
            idle: IdleMode::Native,
        }
    }
}

impl SchedulerConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
