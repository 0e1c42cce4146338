//! Priority scoring on top of the task queue. The queue only knows how to
//! order by `(priority, created_at)`; everything about *what* priority a
//! task should have lives here, as swappable strategies.

use crate::queue::TaskQueue;
use crate::types::Task;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

const ADJUST_INTERVAL: Duration = Duration::from_secs(30);
const FAIRNESS_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MAX_WAIT_SECS: i64 = 5 * 60;

pub trait PriorityStrategy: Send + Sync {
    fn score(&self, task: &Task, now: i64) -> i32;
}

/// Contract executions are time-sensitive (they gate chain progress); AI
/// model inference proofs are usually requested out of band and can wait.
pub struct TransactionTypeStrategy;

impl PriorityStrategy for TransactionTypeStrategy {
    fn score(&self, task: &Task, _now: i64) -> i32 {
        match task.input.circuit_id.as_str() {
            "contract_execution" => 10,
            "aimodel_inference" => 2,
            _ => 0,
        }
    }
}

/// Favors tasks with a shorter recorded execution trace, on the assumption
/// that their witness construction and proving will be cheaper.
pub struct ExecutionTimeStrategy;

impl PriorityStrategy for ExecutionTimeStrategy {
    fn score(&self, task: &Task, _now: i64) -> i32 {
        let trace_len = task.execution_trace.len() as i32;
        (20 - trace_len).max(0)
    }
}

/// Grows with how long a task has been waiting, one point per 10 seconds
/// up to a cap, so an old task eventually outranks a flood of new ones.
pub struct WaitTimeStrategy;

impl PriorityStrategy for WaitTimeStrategy {
    fn score(&self, task: &Task, now: i64) -> i32 {
        let waited = (now - task.created_at).max(0);
        i32::try_from(waited / 10).unwrap_or(i32::MAX).min(50)
    }
}

pub struct MixedStrategy {
    weighted: Vec<(f64, Arc<dyn PriorityStrategy>)>,
}

impl MixedStrategy {
    #[must_use]
    pub fn new(weighted: Vec<(f64, Arc<dyn PriorityStrategy>)>) -> Self {
        Self { weighted }
    }

    #[must_use]
    pub fn balanced() -> Self {
        Self::new(vec![
            (1.0, Arc::new(TransactionTypeStrategy) as Arc<dyn PriorityStrategy>),
            (0.5, Arc::new(ExecutionTimeStrategy)),
            (0.8, Arc::new(WaitTimeStrategy)),
        ])
    }
}

impl PriorityStrategy for MixedStrategy {
    fn score(&self, task: &Task, now: i64) -> i32 {
        let total: f64 = self.weighted.iter().map(|(weight, strategy)| weight * f64::from(strategy.score(task, now))).sum();
        total.round() as i32
    }
}

pub struct PriorityScheduler {
    queue: Arc<TaskQueue>,
    strategy: Arc<dyn PriorityStrategy>,
    version: AtomicU64,
    max_priority_seen: AtomicI32,
    max_wait_secs: i64,
}

impl PriorityScheduler {
    #[must_use]
    pub fn new(queue: Arc<TaskQueue>, strategy: Arc<dyn PriorityStrategy>) -> Self {
        Self { queue, strategy, version: AtomicU64::new(0), max_priority_seen: AtomicI32::new(0), max_wait_secs: DEFAULT_MAX_WAIT_SECS }
    }

    pub fn submit(&self, mut task: Task) -> crate::types::TaskId {
        let now = chrono::Utc::now().timestamp();
        let score = self.strategy.score(&task, now) + task.priority;
        task.priority = score;
        self.max_priority_seen.fetch_max(score, Ordering::SeqCst);
        self.queue.enqueue(task)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn rescore_all(&self) {
        let now = chrono::Utc::now().timestamp();
        for mut task in self.queue.pending_snapshot() {
            let score = self.strategy.score(&task, now);
            if score != task.priority {
                task.priority = score;
                self.max_priority_seen.fetch_max(score, Ordering::SeqCst);
                self.queue.re_enqueue(task);
            }
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn boost_starved(&self) {
        let now = chrono::Utc::now().timestamp();
        let ceiling = self.max_priority_seen.load(Ordering::SeqCst);
        for mut task in self.queue.pending_snapshot() {
            if now - task.created_at > self.max_wait_secs && task.priority < ceiling {
                task.priority = ceiling;
                info!(task_id = %task.task_id.0, "boosted starved task to max priority");
                self.queue.re_enqueue(task);
            }
        }
    }

    /// Re-scores every pending task every 30 seconds so a strategy change
    /// (or simple time decay in `WaitTimeStrategy`) keeps affecting tasks
    /// that were already enqueued, not just new ones.
    pub fn spawn_adjuster(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(ADJUST_INTERVAL);
            scheduler.rescore_all();
        })
    }

    /// Prevents starvation: any task waiting longer than `max_wait_secs`
    /// gets bumped to the highest priority seen so far.
    pub fn spawn_fairness_checker(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        thread::spawn(move || loop {
            thread::sleep(FAIRNESS_INTERVAL);
            scheduler.boost_starved();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ZKProofInput;
    use chain_types::Hash256;

    fn task(circuit_id: &str, priority: i32) -> Task {
        Task::new(
            ZKProofInput { circuit_id: circuit_id.to_string(), circuit_version: 1, public_inputs: vec![], private_inputs: vec![] },
            Hash256::zero(),
            priority,
            chrono::Utc::now().timestamp() + 3600,
        )
    }

    #[test]
    fn transaction_type_strategy_favors_contract_execution() {
        let strategy = TransactionTypeStrategy;
        let now = chrono::Utc::now().timestamp();
        assert!(strategy.score(&task("contract_execution", 0), now) > strategy.score(&task("aimodel_inference", 0), now));
    }

    #[test]
    fn submit_combines_base_priority_with_strategy_score() {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = PriorityScheduler::new(Arc::clone(&queue), Arc::new(TransactionTypeStrategy));
        let id = scheduler.submit(task("contract_execution", 5));
        let stored = queue.get(&id).unwrap();
        assert_eq!(stored.priority, 15);
    }

    #[test]
    fn boost_starved_raises_old_tasks_to_max_priority() {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Arc::new(PriorityScheduler::new(Arc::clone(&queue), Arc::new(TransactionTypeStrategy)));
        scheduler.max_priority_seen.store(99, Ordering::SeqCst);

        let mut stale = task("aimodel_inference", 1);
        stale.created_at -= DEFAULT_MAX_WAIT_SECS + 10;
        let stale_id = stale.task_id.clone();
        queue.enqueue(stale);

        scheduler.boost_starved();
        assert_eq!(queue.get(&stale_id).unwrap().priority, 99);
    }
}
