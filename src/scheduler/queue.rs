//! Priority queue of pending tasks.
//!
//! High tasks go ahead of everything Normal/Low that is still waiting.
//! Within one priority class tasks keep submission order.

use std::collections::VecDeque;
use std::time::Instant;

use futures::future::BoxFuture;

/// Task priority. Fixed once the task is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    /// Deferred to the next idle window.
    Low,
}

impl Priority {
    /// Whether the task counts as foreground work for idle detection.
    pub fn is_foreground(self) -> bool {
        !matches!(self, Priority::Low)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Type-erased body of a task. Runs the action and resolves its handle.
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A task waiting for a free slot.
pub(crate) struct QueuedTask {
    pub id: uuid::Uuid,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub generation: u64,
    pub job: Job,
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<QueuedTask>,
    /// Number of High tasks at the head of `tasks`.
    high: usize,
}

impl TaskQueue {
    pub fn push(&mut self, task: QueuedTask) {
        match task.priority {
            Priority::High => {
                // Highs form a contiguous prefix; append to it.
                self.tasks.insert(self.high, task);
                self.high += 1;
            }
            Priority::Normal | Priority::Low => self.tasks.push_back(task),
        }
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        let task = self.tasks.pop_front()?;
        if task.priority == Priority::High {
            self.high -= 1;
        }
        Some(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every pending task. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        self.tasks.clear();
        self.high = 0;
        n
    }
}
