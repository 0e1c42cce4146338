//! Top-level entry point: wires the queue, scheduler and worker pool
//! together behind a small submission/subscription surface.

use crate::circuits::CircuitManager;
use crate::proving::SchemeRegistry;
use crate::queue::TaskQueue;
use crate::reliability::{ReliabilityConfig, ReliabilityEnforcer};
use crate::scheduler::{MixedStrategy, PriorityScheduler};
use crate::types::{HostFunctionCall, Task, TaskId, ZKProofInput};
use crate::worker::WorkerPool;
use chain_types::{Capabilities, Hash256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type OneShot = Box<dyn FnOnce(Task) + Send>;
type StatusSubscriber = Box<dyn Fn(&Task) + Send + Sync>;

pub struct PipelineConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scheme_name: &'static str,
    pub reliability: ReliabilityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { min_workers: 2, max_workers: 8, scheme_name: "groth16", reliability: ReliabilityConfig::default() }
    }
}

pub struct Pipeline {
    queue: Arc<TaskQueue>,
    scheduler: Arc<PriorityScheduler>,
    pool: Arc<WorkerPool>,
    callbacks: Arc<Mutex<HashMap<TaskId, OneShot>>>,
    subscribers: Arc<Mutex<Vec<StatusSubscriber>>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: PipelineConfig, caps: Arc<dyn Capabilities>) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Arc::new(PriorityScheduler::new(Arc::clone(&queue), Arc::new(MixedStrategy::balanced())));
        let circuits = Arc::new(CircuitManager::new());
        let schemes = Arc::new(SchemeRegistry::with_defaults());
        let reliability = Arc::new(ReliabilityEnforcer::new(config.reliability));

        let callbacks: Arc<Mutex<HashMap<TaskId, OneShot>>> = Arc::new(Mutex::new(HashMap::new()));
        let subscribers: Arc<Mutex<Vec<StatusSubscriber>>> = Arc::new(Mutex::new(Vec::new()));

        let dispatch_callbacks = Arc::clone(&callbacks);
        let dispatch_subscribers = Arc::clone(&subscribers);
        let on_complete: Arc<dyn Fn(Task) + Send + Sync> = Arc::new(move |task: Task| {
            for subscriber in dispatch_subscribers.lock().expect("subscribers poisoned").iter() {
                subscriber(&task);
            }
            let one_shot = dispatch_callbacks.lock().expect("callbacks poisoned").remove(&task.task_id);
            if let Some(callback) = one_shot {
                callback(task);
            }
        });
        queue.set_on_terminal(Arc::clone(&on_complete));

        let pool = WorkerPool::new(
            config.min_workers,
            config.max_workers,
            Arc::clone(&queue),
            Arc::clone(&circuits),
            Arc::clone(&schemes),
            Arc::clone(&caps),
            Arc::clone(&reliability),
            config.scheme_name,
            Arc::clone(&on_complete),
        );
        pool.spawn_scaler(circuits, schemes, caps, reliability, config.scheme_name, on_complete);
        scheduler.spawn_adjuster();
        scheduler.spawn_fairness_checker();
        queue.spawn_timeout_checker();

        Self { queue, scheduler, pool, callbacks, subscribers }
    }

    /// Submits a task for proving. `on_complete`, if given, fires exactly
    /// once with the task's terminal state (`Completed`, `Failed`,
    /// `Timeout` or `Cancelled`).
    pub fn submit(
        &self,
        input: ZKProofInput,
        execution_result_hash: Hash256,
        execution_trace: Vec<HostFunctionCall>,
        priority: i32,
        timeout_at: i64,
        on_complete: Option<OneShot>,
    ) -> TaskId {
        let mut task = Task::new(input, execution_result_hash, priority, timeout_at);
        task.execution_trace = execution_trace;
        let task_id = task.task_id.clone();
        if let Some(callback) = on_complete {
            self.callbacks.lock().expect("callbacks poisoned").insert(task_id.clone(), callback);
        }
        self.scheduler.submit(task)
    }

    /// Current status of a submitted task, or `None` if it is unknown.
    #[must_use]
    pub fn on_status(&self, task_id: &TaskId) -> Option<crate::types::TaskStatus> {
        self.queue.get(task_id).map(|task| task.status)
    }

    /// Registers a subscriber notified on every task's terminal transition,
    /// in addition to any one-shot callback passed to `submit`.
    pub fn subscribe(&self, subscriber: impl Fn(&Task) + Send + Sync + 'static) {
        self.subscribers.lock().expect("subscribers poisoned").push(Box::new(subscriber));
    }

    pub fn cancel(&self, task_id: &TaskId) -> Result<(), crate::error::PipelineError> {
        self.queue.cancel(task_id)
    }

    #[must_use]
    pub fn status(&self, task_id: &TaskId) -> Option<Task> {
        self.queue.get(task_id)
    }

    #[must_use]
    pub fn queue_stats(&self) -> crate::queue::QueueStats {
        self.queue.stats()
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.queue.stop_timeout_checker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_types::DefaultCapabilities;

    #[test]
    fn submit_returns_a_retrievable_task() {
        let pipeline = Pipeline::new(PipelineConfig { min_workers: 0, max_workers: 0, ..PipelineConfig::default() }, Arc::new(DefaultCapabilities));
        let id = pipeline.submit(
            ZKProofInput { circuit_id: "contract_execution".to_string(), circuit_version: 1, public_inputs: vec![], private_inputs: vec![] },
            Hash256::zero(),
            vec![HostFunctionCall { name: "call".to_string(), args: vec![], result: vec![] }],
            0,
            chrono::Utc::now().timestamp() + 60,
            None,
        );
        assert!(pipeline.status(&id).is_some());
        pipeline.shutdown();
    }

    #[test]
    fn cancel_marks_task_cancelled() {
        let pipeline = Pipeline::new(PipelineConfig { min_workers: 0, max_workers: 0, ..PipelineConfig::default() }, Arc::new(DefaultCapabilities));
        let id = pipeline.submit(
            ZKProofInput { circuit_id: "contract_execution".to_string(), circuit_version: 1, public_inputs: vec![], private_inputs: vec![] },
            Hash256::zero(),
            vec![],
            0,
            chrono::Utc::now().timestamp() + 60,
            None,
        );
        assert!(pipeline.cancel(&id).is_ok());
        assert_eq!(pipeline.on_status(&id), Some(crate::types::TaskStatus::Cancelled));
        pipeline.shutdown();
    }

    #[test]
    fn cancel_fires_the_registered_one_shot_callback() {
        let pipeline = Pipeline::new(PipelineConfig { min_workers: 0, max_workers: 0, ..PipelineConfig::default() }, Arc::new(DefaultCapabilities));
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_callback = Arc::clone(&fired);
        let id = pipeline.submit(
            ZKProofInput { circuit_id: "contract_execution".to_string(), circuit_version: 1, public_inputs: vec![], private_inputs: vec![] },
            Hash256::zero(),
            vec![],
            0,
            chrono::Utc::now().timestamp() + 60,
            Some(Box::new(move |task| {
                assert_eq!(task.status, crate::types::TaskStatus::Cancelled);
                fired_in_callback.store(true, Ordering::SeqCst);
            })),
        );
        assert!(pipeline.cancel(&id).is_ok());
        assert!(fired.load(Ordering::SeqCst));
        pipeline.shutdown();
    }
}
