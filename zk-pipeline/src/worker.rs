//! Worker pool: a fixed band of OS threads, each looping
//! dequeue -> mark running -> build witness -> prove -> self-verify ->
//! callback, built on the `Arc<Mutex<_>>` + `Arc<AtomicBool>` +
//! `thread::spawn` worker idiom used elsewhere in this workspace's
//! concurrent components.

use crate::circuits::{build_witness, CircuitKind, CircuitManager};
use crate::error::PipelineError;
use crate::proving::SchemeRegistry;
use crate::queue::TaskQueue;
use crate::reliability::ReliabilityEnforcer;
use crate::types::{Curve, Task, TaskStatus};
use chain_types::Capabilities;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Default)]
struct WorkerStats {
    successes: u64,
    failures: u64,
    error_count: u64,
}

impl WorkerStats {
    /// Degraded when the failure rate over history exceeds 50%; unhealthy
    /// once the total error count exceeds 10, regardless of rate.
    fn health(&self) -> WorkerHealth {
        if self.error_count > 10 {
            return WorkerHealth::Unhealthy;
        }
        let total = self.successes + self.failures;
        if total == 0 {
            return WorkerHealth::Healthy;
        }
        let failure_rate = self.failures as f64 / total as f64;
        if failure_rate > 0.5 {
            WorkerHealth::Degraded
        } else {
            WorkerHealth::Healthy
        }
    }

    fn record_success(&mut self) {
        self.successes += 1;
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        self.error_count += 1;
    }
}

const SCALE_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const QUEUE_SIZE_SCALE_UP: usize = 100;

pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    target_workers: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    min_workers: usize,
    max_workers: usize,
    stats: Arc<Mutex<HashMap<usize, WorkerStats>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_index: AtomicUsize,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        queue: Arc<TaskQueue>,
        circuits: Arc<CircuitManager>,
        schemes: Arc<SchemeRegistry>,
        caps: Arc<dyn Capabilities>,
        reliability: Arc<ReliabilityEnforcer>,
        scheme_name: &'static str,
        on_complete: Arc<dyn Fn(Task) + Send + Sync>,
    ) -> Arc<Self> {
        let max_workers = max_workers.max(min_workers);
        let pool = Arc::new(Self {
            queue,
            target_workers: Arc::new(AtomicUsize::new(min_workers)),
            shutdown: Arc::new(AtomicBool::new(false)),
            min_workers,
            max_workers,
            stats: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
            next_index: AtomicUsize::new(0),
        });
        for _ in 0..min_workers {
            pool.spawn_one(Arc::clone(&circuits), Arc::clone(&schemes), Arc::clone(&caps), Arc::clone(&reliability), scheme_name, Arc::clone(&on_complete));
        }
        pool
    }

    fn spawn_one(
        self: &Arc<Self>,
        circuits: Arc<CircuitManager>,
        schemes: Arc<SchemeRegistry>,
        caps: Arc<dyn Capabilities>,
        reliability: Arc<ReliabilityEnforcer>,
        scheme_name: &'static str,
        on_complete: Arc<dyn Fn(Task) + Send + Sync>,
    ) {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let pool = Arc::clone(self);
        let handle = thread::spawn(move || {
            loop {
                if pool.shutdown.load(Ordering::SeqCst) || index >= pool.target_workers.load(Ordering::SeqCst) {
                    break;
                }
                let Some(task) = pool.queue.dequeue() else {
                    thread::sleep(Duration::from_millis(50));
                    continue;
                };
                pool.process_task(index, task, &circuits, &schemes, caps.as_ref(), &reliability, scheme_name, on_complete.as_ref());
            }
        });
        self.handles.lock().expect("handles poisoned").push(handle);
    }

    #[allow(clippy::too_many_arguments)]
    fn process_task(
        &self,
        worker_index: usize,
        mut task: Task,
        circuits: &CircuitManager,
        schemes: &SchemeRegistry,
        caps: &dyn Capabilities,
        reliability: &ReliabilityEnforcer,
        scheme_name: &str,
        on_complete: &(dyn Fn(Task) + Send + Sync),
    ) {
        self.queue.update_status(&task.task_id, TaskStatus::Running);
        task.status = TaskStatus::Running;
        task.started_at = Some(chrono::Utc::now().timestamp());

        let outcome = self.attempt_proof(&task, circuits, schemes, caps, reliability, scheme_name);

        let mut stats = self.stats.lock().expect("worker stats poisoned");
        let worker_stats = stats.entry(worker_index).or_default();

        match outcome {
            Ok(proof) => {
                worker_stats.record_success();
                task.proof_result = Some(proof);
                task.status = TaskStatus::Completed;
                task.completed_at = Some(chrono::Utc::now().timestamp());
                info!(task_id = %task.task_id.0, worker = worker_index, "proof generated");
                self.queue.replace(task.clone());
                on_complete(task);
            }
            Err(e) => {
                worker_stats.record_failure();
                warn!(task_id = %task.task_id.0, worker = worker_index, error = %e, "proof attempt failed");
                if task.retry_count < task.max_retries {
                    task.retry_count += 1;
                    task.priority -= 10;
                    task.status = TaskStatus::Pending;
                    task.error = Some(e.to_string());
                    self.queue.re_enqueue(task);
                } else {
                    task.status = TaskStatus::Failed;
                    task.error = Some(e.to_string());
                    task.completed_at = Some(chrono::Utc::now().timestamp());
                    self.queue.replace(task.clone());
                    on_complete(task);
                }
            }
        }
    }

    fn attempt_proof(
        &self,
        task: &Task,
        circuits: &CircuitManager,
        schemes: &SchemeRegistry,
        caps: &dyn Capabilities,
        reliability: &ReliabilityEnforcer,
        scheme_name: &str,
    ) -> Result<crate::types::StateProof, PipelineError> {
        let circuit_id = task.input.circuit_id.clone();
        let circuit_version = task.input.circuit_version;
        let kind = CircuitKind::from_circuit_id(&circuit_id).ok_or_else(|| PipelineError::CircuitNotFound {
            circuit_id: circuit_id.clone(),
            circuit_version,
        })?;
        let provider = schemes.get(scheme_name).ok_or_else(|| PipelineError::UnsupportedCircuitType {
            circuit_id: circuit_id.clone(),
            circuit_version,
            cause: format!("unknown proving scheme {scheme_name}"),
        })?;
        let keys = circuits.get_or_compile(&circuit_id, circuit_version, Curve::Bn254, provider.as_ref())?;
        let witness = build_witness(task, kind)?;

        reliability.run_with_retry(|_attempt| {
            let proof = provider.prove(&keys.0, &witness, &task.input.public_inputs, caps)?;
            reliability.self_verify(provider.as_ref(), &keys.1, &proof, caps)?;
            Ok(proof)
        })
    }

    #[must_use]
    pub fn health_of(&self, worker_index: usize) -> Option<WorkerHealth> {
        self.stats.lock().expect("worker stats poisoned").get(&worker_index).map(WorkerStats::health)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut handles = self.handles.lock().expect("handles poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Scales the active worker count between `min_workers` and
    /// `max_workers` based on queue pressure. Workers above the new target
    /// exit at the top of their next loop iteration; scaling up spawns
    /// fresh threads immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_scaler(
        self: &Arc<Self>,
        circuits: Arc<CircuitManager>,
        schemes: Arc<SchemeRegistry>,
        caps: Arc<dyn Capabilities>,
        reliability: Arc<ReliabilityEnforcer>,
        scheme_name: &'static str,
        on_complete: Arc<dyn Fn(Task) + Send + Sync>,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        thread::spawn(move || loop {
            if pool.shutdown.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(SCALE_CHECK_INTERVAL);
            let queued = pool.queue.stats().pending;
            let current = pool.target_workers.load(Ordering::SeqCst);
            if queued > QUEUE_SIZE_SCALE_UP && current < pool.max_workers {
                let new_target = (current + 1).min(pool.max_workers);
                pool.target_workers.store(new_target, Ordering::SeqCst);
                pool.spawn_one(Arc::clone(&circuits), Arc::clone(&schemes), Arc::clone(&caps), Arc::clone(&reliability), scheme_name, Arc::clone(&on_complete));
                info!(workers = new_target, "worker pool scaled up");
            } else if queued == 0 && current > pool.min_workers {
                let new_target = (current - 1).max(pool.min_workers);
                pool.target_workers.store(new_target, Ordering::SeqCst);
                info!(workers = new_target, "worker pool scaled down");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_degrades_when_failure_rate_exceeds_half() {
        let mut stats = WorkerStats::default();
        for _ in 0..2 {
            stats.record_success();
        }
        for _ in 0..3 {
            stats.record_failure();
        }
        assert_eq!(stats.health(), WorkerHealth::Degraded);
    }

    #[test]
    fn error_count_past_ten_marks_unhealthy_regardless_of_ratio() {
        let mut stats = WorkerStats::default();
        for _ in 0..200 {
            stats.record_success();
        }
        for _ in 0..11 {
            stats.record_failure();
        }
        assert_eq!(stats.health(), WorkerHealth::Unhealthy);
    }

    #[test]
    fn no_history_is_healthy() {
        assert_eq!(WorkerStats::default().health(), WorkerHealth::Healthy);
    }
}
