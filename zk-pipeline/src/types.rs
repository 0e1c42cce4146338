//! Task and proof artifact types the pipeline moves between its stages.

use chain_types::Hash256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl TaskId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZKProofInput {
    pub circuit_id: String,
    pub circuit_version: u32,
    pub public_inputs: Vec<Vec<u8>>,
    pub private_inputs: Vec<u8>,
}

/// One execution-trace entry recorded while the task's underlying
/// computation ran, fed to the witness builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFunctionCall {
    pub name: String,
    pub args: Vec<u8>,
    pub result: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvingScheme {
    Groth16,
    Plonk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    Bn254,
    Bls12_381,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProof {
    pub proof: Vec<u8>,
    pub public_inputs: Vec<Vec<u8>>,
    pub proving_scheme: ProvingScheme,
    pub curve: Curve,
    pub verification_key_hash: Hash256,
    pub circuit_id: String,
    pub circuit_version: u32,
    pub constraint_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub execution_id: ExecutionId,
    pub input: ZKProofInput,
    pub execution_result_hash: Hash256,
    pub execution_trace: Vec<HostFunctionCall>,
    pub priority: i32,
    pub status: TaskStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub timeout_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub proof_result: Option<StateProof>,
    pub error: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new(input: ZKProofInput, execution_result_hash: Hash256, priority: i32, timeout_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            task_id: TaskId::generate(),
            execution_id: ExecutionId(uuid::Uuid::new_v4().to_string()),
            input,
            execution_result_hash,
            execution_trace: Vec::new(),
            priority,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            timeout_at,
            retry_count: 0,
            max_retries: 3,
            proof_result: None,
            error: None,
        }
    }
}
