//! Periodic refresh driver.
//!
//! Each tick hands the refresh callback to the [`TaskScheduler`] rather
//! than calling it, so polling obeys the same concurrency bound as every
//! other background task.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::network::{NetworkQualityMonitor, NetworkTier};
use crate::scheduler::{Priority, TaskHandle, TaskScheduler};

/// Shared refresh operation.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`RefreshFn`].
pub fn refresh_fn<F, Fut>(f: F) -> RefreshFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Owns at most one repeating timer.
///
/// Running means a callback is installed. A running controller with a zero
/// interval has no timer (offline: nothing to poll).
pub struct PollingController {
    scheduler: TaskScheduler,
    state: Mutex<PollState>,
}

struct PollState {
    interval: Duration,
    callback: Option<RefreshFn>,
    timer: Option<JoinHandle<()>>,
}

impl PollingController {
    pub fn new(scheduler: TaskScheduler, interval: Duration) -> Self {
        Self {
            scheduler,
            state: Mutex::new(PollState {
                interval,
                callback: None,
                timer: None,
            }),
        }
    }

    /// Replace any running timer with one firing every `interval`.
    pub fn start(&self, interval: Duration, refresh: RefreshFn) {
        let mut state = self.state();
        state.interval = interval;
        self.install(&mut state, refresh);
    }

    /// Start with the currently configured interval.
    pub fn resume(&self, refresh: RefreshFn) {
        let mut state = self.state();
        self.install(&mut state, refresh);
    }

    /// Cancel the timer. Safe to call when idle.
    pub fn stop(&self) {
        let mut state = self.state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.callback.take().is_some() {
            info!("background polling stopped");
        }
    }

    /// Change cadence. Restarts the timer if running, otherwise applies on
    /// the next [`resume`](Self::resume).
    pub fn set_interval(&self, interval: Duration) {
        let mut state = self.state();
        if state.interval == interval {
            return;
        }
        state.interval = interval;
        if let Some(refresh) = state.callback.clone() {
            self.install(&mut state, refresh);
        }
    }

    /// Submit the callback once at high priority, outside the cadence.
    pub fn refresh_now(&self) -> Option<TaskHandle<()>> {
        let refresh = self.state().callback.clone()?;
        debug!("immediate refresh requested");
        Some(self.scheduler.submit(Priority::High, move || refresh()))
    }

    pub fn is_running(&self) -> bool {
        self.state().callback.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.state().interval
    }

    /// Track the monitor's tier: each change maps to a new interval, and
    /// coming back from offline triggers an immediate refresh.
    pub fn follow(self: &Arc<Self>, monitor: &NetworkQualityMonitor) -> JoinHandle<()> {
        let mut tiers = monitor.subscribe();
        let controller = Arc::clone(self);

        tokio::spawn(async move {
            let mut last = *tiers.borrow_and_update();
            controller.set_interval(last.polling_interval());

            while tiers.changed().await.is_ok() {
                let tier = *tiers.borrow_and_update();
                controller.set_interval(tier.polling_interval());
                if last == NetworkTier::Offline && tier != NetworkTier::Offline {
                    info!(%tier, "back online, refreshing");
                    controller.refresh_now();
                }
                last = tier;
            }
        })
    }

    fn install(&self, state: &mut PollState, refresh: RefreshFn) {
        if let Some(old) = state.timer.take() {
            old.abort();
        }
        state.callback = Some(refresh.clone());

        if state.interval.is_zero() {
            info!("background polling paused (zero interval)");
            return;
        }

        let interval = state.interval;
        let scheduler = self.scheduler.clone();
        state.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let refresh = refresh.clone();
                let handle = scheduler.submit(Priority::Normal, move || refresh());
                debug!(task = %handle.id(), "scheduled refresh submitted");
            }
        }));
        info!(interval_ms = interval.as_millis() as u64, "background polling started");
    }

    fn state(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        if let Some(timer) = self.state().timer.take() {
            timer.abort();
        }
    }
}
