//! The priority task queue: a max-heap ordered by `(priority,
//! Reverse(created_at))` so the highest-priority, earliest-submitted task
//! dequeues first. Cancelled/timed-out entries are skipped lazily rather
//! than removed from the heap eagerly, since `BinaryHeap` has no efficient
//! arbitrary-element removal.

use crate::error::PipelineError;
use crate::types::{Task, TaskId, TaskStatus};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Eq, PartialEq)]
struct QueueEntry {
    priority: i32,
    created_at: Reverse<i64>,
    task_id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| self.created_at.cmp(&other.created_at))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub cancelled: usize,
}

#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<HashMap<TaskId, Task>>,
    heap: Mutex<BinaryHeap<QueueEntry>>,
    shutdown: AtomicBool,
    on_terminal: Mutex<Option<Arc<dyn Fn(Task) + Send + Sync>>>,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the hook invoked exactly once, with the task's terminal
    /// state, whenever this queue transitions a task to `Cancelled` or
    /// `Timeout` directly (the `Completed`/`Failed` transitions are driven
    /// by the worker pool instead, which invokes the same hook itself).
    pub fn set_on_terminal(&self, callback: Arc<dyn Fn(Task) + Send + Sync>) {
        *self.on_terminal.lock().expect("on_terminal poisoned") = Some(callback);
    }

    pub fn enqueue(&self, task: Task) -> TaskId {
        let task_id = task.task_id.clone();
        let entry = QueueEntry {
            priority: task.priority,
            created_at: Reverse(task.created_at),
            task_id: task_id.clone(),
        };
        self.tasks.lock().expect("task map poisoned").insert(task_id.clone(), task);
        self.heap.lock().expect("heap poisoned").push(entry);
        task_id
    }

    /// Pops the highest-priority pending task, skipping any entry whose
    /// task has since been cancelled, timed out, or re-enqueued at a
    /// different priority.
    pub fn dequeue(&self) -> Option<Task> {
        let mut heap = self.heap.lock().expect("heap poisoned");
        loop {
            let entry = heap.pop()?;
            let tasks = self.tasks.lock().expect("task map poisoned");
            if let Some(task) = tasks.get(&entry.task_id) {
                if task.status == TaskStatus::Pending && task.priority == entry.priority {
                    return Some(task.clone());
                }
            }
        }
    }

    #[must_use]
    pub fn peek(&self) -> Option<Task> {
        let heap = self.heap.lock().expect("heap poisoned").clone();
        let tasks = self.tasks.lock().expect("task map poisoned");
        let mut candidates: Vec<QueueEntry> = heap.into_vec();
        candidates.sort();
        candidates
            .into_iter()
            .rev()
            .find_map(|entry| tasks.get(&entry.task_id).filter(|t| t.status == TaskStatus::Pending).cloned())
    }

    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.lock().expect("task map poisoned").get(task_id).cloned()
    }

    /// Marks a task cancelled. Its heap entry, if any, is skipped lazily on
    /// the next dequeue/peek. A task that does not exist, or has already
    /// reached a terminal state, is reported as `TaskNotFound` rather than
    /// silently ignored.
    pub fn cancel(&self, task_id: &TaskId) -> Result<(), PipelineError> {
        let cancelled = {
            let mut tasks = self.tasks.lock().expect("task map poisoned");
            match tasks.get_mut(task_id) {
                Some(task) if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) => {
                    task.status = TaskStatus::Cancelled;
                    task.completed_at = Some(chrono::Utc::now().timestamp());
                    task.clone()
                }
                _ => return Err(PipelineError::TaskNotFound(task_id.0.clone())),
            }
        };
        if let Some(on_terminal) = self.on_terminal.lock().expect("on_terminal poisoned").as_ref() {
            on_terminal(cancelled);
        }
        Ok(())
    }

    pub fn update_status(&self, task_id: &TaskId, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.lock().expect("task map poisoned");
        if let Some(task) = tasks.get_mut(task_id) {
            task.status = status;
            if matches!(status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled) {
                task.completed_at = Some(chrono::Utc::now().timestamp());
            } else if status == TaskStatus::Running {
                task.started_at = Some(chrono::Utc::now().timestamp());
            }
            true
        } else {
            false
        }
    }

    /// Overwrites a task's stored state without touching the heap. Used to
    /// record a terminal outcome (proof result, error) for a task that is
    /// no longer eligible to be dequeued again.
    pub fn replace(&self, task: Task) {
        let task_id = task.task_id.clone();
        self.tasks.lock().expect("task map poisoned").insert(task_id, task);
    }

    /// Re-enqueues a task that has already been mutated by the caller
    /// (priority demoted, retry_count incremented).
    pub fn re_enqueue(&self, task: Task) {
        let task_id = task.task_id.clone();
        let entry = QueueEntry {
            priority: task.priority,
            created_at: Reverse(task.created_at),
            task_id: task_id.clone(),
        };
        self.tasks.lock().expect("task map poisoned").insert(task_id, task);
        self.heap.lock().expect("heap poisoned").push(entry);
    }

    /// Clones of every currently pending task, for the scheduler's
    /// re-scoring and fairness passes.
    #[must_use]
    pub fn pending_snapshot(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .expect("task map poisoned")
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let tasks = self.tasks.lock().expect("task map poisoned");
        let mut stats = QueueStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Timeout => stats.timeout += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn stop_timeout_checker(&self) {
        self.shutdown.store(true, AtomicOrdering::SeqCst);
    }

    /// Spawns a background thread that wakes every second and marks any
    /// `Pending`/`Running` task past its `timeout_at` as `Timeout`, then
    /// dispatches the terminal-state hook for each one it finds.
    pub fn spawn_timeout_checker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        thread::spawn(move || loop {
            if queue.shutdown.load(AtomicOrdering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_secs(1));
            let now = chrono::Utc::now().timestamp();
            let timed_out: Vec<Task> = {
                let mut tasks = queue.tasks.lock().expect("task map poisoned");
                let mut timed_out = Vec::new();
                for task in tasks.values_mut() {
                    if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) && now > task.timeout_at {
                        task.status = TaskStatus::Timeout;
                        task.completed_at = Some(now);
                        info!(task_id = %task.task_id.0, "task timed out");
                        timed_out.push(task.clone());
                    }
                }
                timed_out
            };
            if !timed_out.is_empty() {
                let on_terminal = queue.on_terminal.lock().expect("on_terminal poisoned").clone();
                if let Some(on_terminal) = on_terminal {
                    for task in timed_out {
                        on_terminal(task);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZKProofInput;
    use chain_types::Hash256;

    fn task(priority: i32) -> Task {
        Task::new(
            ZKProofInput {
                circuit_id: "contract_execution".to_string(),
                circuit_version: 1,
                public_inputs: vec![],
                private_inputs: vec![],
            },
            Hash256::zero(),
            priority,
            chrono::Utc::now().timestamp() + 60,
        )
    }

    #[test]
    fn dequeues_highest_priority_first() {
        let queue = TaskQueue::new();
        queue.enqueue(task(1));
        let high = task(5);
        let high_id = high.task_id.clone();
        queue.enqueue(high);

        let next = queue.dequeue().unwrap();
        assert_eq!(next.task_id, high_id);
    }

    #[test]
    fn equal_priority_dequeues_earliest_first() {
        let queue = TaskQueue::new();
        let mut earlier = task(1);
        earlier.created_at -= 10;
        let earlier_id = earlier.task_id.clone();
        queue.enqueue(earlier);
        queue.enqueue(task(1));

        let next = queue.dequeue().unwrap();
        assert_eq!(next.task_id, earlier_id);
    }

    #[test]
    fn cancelled_task_is_skipped_on_dequeue() {
        let queue = TaskQueue::new();
        let cancelled = task(10);
        let cancelled_id = cancelled.task_id.clone();
        queue.enqueue(cancelled);
        let survivor = task(1);
        let survivor_id = survivor.task_id.clone();
        queue.enqueue(survivor);

        assert!(queue.cancel(&cancelled_id).is_ok());
        let next = queue.dequeue().unwrap();
        assert_eq!(next.task_id, survivor_id);
    }

    #[test]
    fn cancel_dispatches_the_terminal_hook() {
        let queue = TaskQueue::new();
        let cancelled = task(1);
        let cancelled_id = cancelled.task_id.clone();
        queue.enqueue(cancelled);
        let seen = Arc::new(Mutex::new(None));
        let seen_in_hook = Arc::clone(&seen);
        queue.set_on_terminal(Arc::new(move |task| {
            *seen_in_hook.lock().expect("seen poisoned") = Some(task.status);
        }));

        assert!(queue.cancel(&cancelled_id).is_ok());
        assert_eq!(*seen.lock().expect("seen poisoned"), Some(TaskStatus::Cancelled));
    }

    #[test]
    fn stats_count_by_status() {
        let queue = TaskQueue::new();
        queue.enqueue(task(1));
        queue.enqueue(task(2));
        let stats = queue.stats();
        assert_eq!(stats.pending, 2);
    }
}
