use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::idle::IdleExecutor;
use super::queue::{Job, Priority, QueuedTask, TaskQueue};
use super::{SchedulerConfig, TaskError};

/// Snapshot of the scheduler for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStatus {
    pub pending: usize,
    pub active: usize,
}

/// Priority scheduler with a fixed number of execution slots.
///
/// Cheap to clone; clones share one queue. Must be created inside a Tokio
/// runtime, after which `submit` may be called from any thread.
///
/// Selection is deferred until the submitter yields, so a burst submitted
/// without an `.await` in between is queued in full before anything starts.
/// That holds on a current-thread runtime (see [`crate::runtime`]). On a
/// multi-thread runtime another worker can select while the burst is still
/// being submitted; the bound and the queue order still hold.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    config: SchedulerConfig,
    idle: Arc<dyn IdleExecutor>,
    /// Foreground (High/Normal) tasks in flight, observed by idle waits.
    foreground: watch::Sender<usize>,
    runtime: Handle,
}

#[derive(Default)]
struct State {
    queue: TaskQueue,
    active: usize,
    foreground: usize,
    /// Bumped by `shutdown` so stragglers don't touch the reset counters.
    generation: u64,
}

impl TaskScheduler {
    /// Build a scheduler using the idle provider named in `config`.
    pub fn new(config: SchedulerConfig) -> Self {
        let idle = config.idle.executor();
        Self::with_idle(config, idle)
    }

    pub fn with_idle(mut config: SchedulerConfig, idle: Arc<dyn IdleExecutor>) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        let (foreground, _) = watch::channel(0);
        let runtime = Handle::current();
        if runtime.runtime_flavor() == RuntimeFlavor::MultiThread {
            warn!("scheduler on a multi-thread runtime, burst ordering is best effort");
        }
        info!(
            max_concurrent = config.max_concurrent,
            idle = ?config.idle,
            "task scheduler initialized"
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                config,
                idle,
                foreground,
                runtime,
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.config.max_concurrent
    }

    /// Queue an asynchronous action. The returned handle resolves exactly
    /// once with the action's value or the reason it produced none.
    pub fn submit<F, Fut, T>(&self, priority: Priority, action: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let runtime = self.inner.runtime.clone();

        let job: Job = Box::new(move || {
            async move {
                // Spawned separately so a panic stays inside this task.
                let outcome = match runtime.spawn(async move { action().await }).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::Failed(err)),
                    Err(join) if join.is_panic() => {
                        Err(TaskError::Panicked(panic_message(join.into_panic())))
                    }
                    Err(_) => Err(TaskError::Aborted),
                };

                if let Err(err) = &outcome {
                    warn!(task = %id, %priority, error = %err, "background task failed");
                }
                // Submitter may have dropped its handle.
                let _ = tx.send(outcome);
            }
            .boxed()
        });

        self.enqueue(id, priority, job);
        TaskHandle { id, priority, rx }
    }

    /// Queue a synchronous action.
    pub fn submit_sync<F, T>(&self, priority: Priority, action: F) -> TaskHandle<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(priority, move || async move { action() })
    }

    fn enqueue(&self, id: Uuid, priority: Priority, job: Job) {
        let pending = {
            let mut state = self.state();
            let generation = state.generation;
            state.queue.push(QueuedTask {
                id,
                priority,
                enqueued_at: Instant::now(),
                generation,
                job,
            });
            state.queue.len()
        };
        debug!(task = %id, %priority, pending, "task queued");
        self.schedule_drain(Duration::ZERO);
    }

    /// Start the next queued task if a slot is free. Safe to call at any time.
    pub fn drain(&self) {
        let task = {
            let mut state = self.state();
            if state.active >= self.inner.config.max_concurrent {
                return;
            }
            let Some(task) = state.queue.pop() else {
                return;
            };
            state.active += 1;
            if task.priority.is_foreground() {
                state.foreground += 1;
                self.inner.foreground.send_replace(state.foreground);
            }
            task
        };

        let scheduler = self.clone();
        self.inner.runtime.spawn(async move { scheduler.execute(task).await });
    }

    async fn execute(&self, task: QueuedTask) {
        let QueuedTask {
            id,
            priority,
            enqueued_at,
            generation,
            job,
        } = task;
        debug!(
            task = %id,
            %priority,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "task started"
        );

        if priority == Priority::Low {
            let deadline = self
                .inner
                .idle
                .until_idle(self.inner.foreground.subscribe(), self.inner.config.idle_timeout())
                .await;
            debug!(task = %id, ?deadline, "idle window reached");
        }

        job().await;

        self.finish(priority, generation);
        self.schedule_drain(self.inner.config.drain_delay());
    }

    fn finish(&self, priority: Priority, generation: u64) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        state.active = state.active.saturating_sub(1);
        if priority.is_foreground() {
            state.foreground = state.foreground.saturating_sub(1);
            self.inner.foreground.send_replace(state.foreground);
        }
    }

    /// Run `drain` later instead of recursing, so other tasks get the runtime.
    fn schedule_drain(&self, delay: Duration) {
        let scheduler = self.clone();
        self.inner.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            scheduler.drain();
        });
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        SchedulerStatus {
            pending: state.queue.len(),
            active: state.active,
        }
    }

    /// Discard every queued task without running it and reset the counters.
    /// Handles of discarded tasks resolve with [`TaskError::Discarded`].
    ///
    /// Tasks already running are not cancelled and are no longer counted:
    /// until they finish, new submissions may run up to `max_concurrent`
    /// tasks alongside them. Their completion leaves the reset counters
    /// alone.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.state();
            let queue = std::mem::take(&mut state.queue);
            state.active = 0;
            state.foreground = 0;
            state.generation += 1;
            self.inner.foreground.send_replace(0);
            queue
        };
        // Dropped outside the lock: task closures may own arbitrary state.
        let mut dropped = dropped;
        let discarded = dropped.clear();
        info!(discarded, "task scheduler shut down");
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Completion of a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: Uuid,
    priority: Priority,
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Discarded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{IdleMode, SchedulerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(max_concurrent: usize) -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig {
            max_concurrent,
            ..SchedulerConfig::default()
        })
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, label: &'static str) {
        log.lock().unwrap().push(label);
    }

    #[tokio::test]
    async fn test_sync_and_async_results_resolve() {
        let s = scheduler(2);
        let a = s.submit_sync(Priority::Normal, || Ok(41 + 1));
        let b = s.submit(Priority::High, || async { Ok("done".to_string()) });
        assert_eq!(a.await.unwrap(), 42);
        assert_eq!(b.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_failure_is_local_to_its_handle() {
        let s = scheduler(1);
        let bad = s.submit_sync::<_, ()>(Priority::Normal, || anyhow::bail!("sensor offline"));
        let boom = s.submit(Priority::Normal, || async {
            let reading: Option<u32> = None;
            Ok(reading.expect("kaboom"))
        });
        let good = s.submit_sync(Priority::Normal, || Ok(7));

        match bad.await {
            Err(TaskError::Failed(e)) => assert!(e.to_string().contains("sensor offline")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        match boom.await {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(good.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_high_runs_before_earlier_normals() {
        let s = scheduler(1);
        let log: Log = Arc::default();

        let handles = [
            ("normal-1", Priority::Normal),
            ("high", Priority::High),
            ("normal-2", Priority::Normal),
        ]
        .map(|(label, priority)| {
            let log = log.clone();
            s.submit_sync(priority, move || {
                record(&log, label);
                Ok(())
            })
        });
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec!["high", "normal-1", "normal-2"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let s = scheduler(1);
        let log: Log = Arc::default();
        let labels = ["a", "b", "c", "d"];

        let mut handles = Vec::new();
        for label in labels {
            let log = log.clone();
            handles.push(s.submit_sync(Priority::Normal, move || {
                record(&log, label);
                Ok(())
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*log.lock().unwrap(), labels.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_bound() {
        let s = scheduler(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            let priority = if i % 3 == 0 { Priority::High } else { Priority::Normal };
            handles.push(s.submit(priority, move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(25)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        let status = s.status();
        assert_eq!(status.active, 2);
        assert_eq!(status.pending, 6);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending_and_resets() {
        let s = scheduler(1);
        let _long = s.submit(Priority::Normal, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let queued: Vec<_> = (0..3).map(|i| s.submit_sync(Priority::Low, move || Ok(i))).collect();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(s.status(), SchedulerStatus { pending: 3, active: 1 });

        s.shutdown();
        assert_eq!(s.status(), SchedulerStatus { pending: 0, active: 0 });
        for h in queued {
            assert!(matches!(h.await, Err(TaskError::Discarded)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_waits_for_foreground() {
        let s = scheduler(2);
        let log: Log = Arc::default();

        let fg = {
            let log = log.clone();
            s.submit(Priority::Normal, move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                record(&log, "refresh");
                Ok(())
            })
        };
        let bg = {
            let log = log.clone();
            s.submit_sync(Priority::Low, move || {
                record(&log, "chart");
                Ok(())
            })
        };

        fg.await.unwrap();
        bg.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["refresh", "chart"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_priority_runs_after_idle_timeout() {
        let s = scheduler(2);
        let started = tokio::time::Instant::now();

        let _busy = s.submit(Priority::Normal, || async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        });
        let low = s.submit_sync(Priority::Low, || Ok(()));

        low.await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(5000), "waited {waited:?}");
        assert!(waited < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_immediate_idle_runs_low_right_away() {
        let s = TaskScheduler::new(SchedulerConfig {
            max_concurrent: 1,
            idle: IdleMode::Immediate,
            ..SchedulerConfig::default()
        });
        assert_eq!(s.submit_sync(Priority::Low, || Ok(3)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_handle_pending_until_task_runs() {
        let s = scheduler(1);
        let (tx, rx) = oneshot::channel::<()>();
        let mut handle = tokio_test::task::spawn(s.submit(Priority::Normal, || async move {
            let _ = rx.await;
            Ok(5)
        }));

        tokio_test::assert_pending!(handle.poll());
        tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bound_holds_on_multi_thread_runtime() {
        let s = scheduler(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                let priority = if i % 4 == 0 { Priority::High } else { Priority::Normal };
                s.submit(priority, move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
            })
            .collect();

        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), i);
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak {peak}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_order_holds_on_multi_thread_runtime() {
        let s = scheduler(1);
        let log: Log = Arc::default();

        let (release, gate) = oneshot::channel::<()>();
        let blocker = s.submit(Priority::Normal, move || async move {
            let _ = gate.await;
            Ok(())
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while s.status().active == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let handles = [
            ("normal-1", Priority::Normal),
            ("high", Priority::High),
            ("normal-2", Priority::Normal),
        ]
        .map(|(label, priority)| {
            let log = log.clone();
            s.submit_sync(priority, move || {
                record(&log, label);
                Ok(())
            })
        });
        assert_eq!(s.status(), SchedulerStatus { pending: 3, active: 1 });

        release.send(()).unwrap();
        blocker.await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["high", "normal-1", "normal-2"]);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_is_noop() {
        let s = scheduler(3);
        s.drain();
        s.drain();
        assert_eq!(s.status(), SchedulerStatus { pending: 0, active: 0 });
    }
}
