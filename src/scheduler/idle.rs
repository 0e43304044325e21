//! Idle-time execution for low-priority tasks.
//!
//! The scheduler picks one implementation at construction and never checks
//! capabilities again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// How an idle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleDeadline {
    /// No foreground work was in flight.
    Idle,
    /// The maximum wait elapsed first.
    TimedOut,
}

/// Which idle provider to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleMode {
    #[default]
    Native,
    Immediate,
}

impl IdleMode {
    pub fn executor(self) -> Arc<dyn IdleExecutor> {
        match self {
            IdleMode::Native => Arc::new(NativeIdle),
            IdleMode::Immediate => Arc::new(ImmediateIdle),
        }
    }
}

/// Waits for an idle window before a low-priority task runs.
#[async_trait]
pub trait IdleExecutor: Send + Sync {
    /// `busy` carries the number of foreground tasks in flight. Must return
    /// no later than `max_wait`.
    async fn until_idle(&self, busy: watch::Receiver<usize>, max_wait: Duration) -> IdleDeadline;
}

/// Waits until no foreground task is running, bounded by `max_wait`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeIdle;

#[async_trait]
impl IdleExecutor for NativeIdle {
    async fn until_idle(&self, mut busy: watch::Receiver<usize>, max_wait: Duration) -> IdleDeadline {
        // Let already-woken tasks run before deciding.
        tokio::task::yield_now().await;

        let waited = tokio::time::timeout(max_wait, async {
            // Err means the sender is gone: the scheduler is being torn down.
            let _ = busy.wait_for(|n| *n == 0).await;
        })
        .await;

        match waited {
            Ok(()) => IdleDeadline::Idle,
            Err(_) => {
                debug!(max_wait_ms = max_wait.as_millis() as u64, "idle wait timed out");
                IdleDeadline::TimedOut
            }
        }
    }
}

/// Fallback when idle detection is unavailable: run right away.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateIdle;

#[async_trait]
impl IdleExecutor for ImmediateIdle {
    async fn until_idle(&self, _busy: watch::Receiver<usize>, _max_wait: Duration) -> IdleDeadline {
        IdleDeadline::Idle
    }
}
