//! Circuit catalogue and the per-circuit witness construction rules.
//!
//! Proving/verifying keys are expensive to derive, so the manager caches
//! one pair per `(circuit_id, circuit_version, curve)` behind a
//! copy-on-replace lock: readers get a cheap `Arc` clone, writers install a
//! whole new map rather than mutate entries in place.

use crate::error::PipelineError;
use crate::proving::ProvingSchemeProvider;
use crate::types::{Curve, HostFunctionCall, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitKind {
    ContractExecution,
    AiModelInference,
    MerkleTree { depth: u32 },
}

impl CircuitKind {
    /// `MerkleTree` circuits only make sense at a fixed, validated depth;
    /// constructing one from a raw `depth` elsewhere would let a depth of 0
    /// or an absurdly large depth slip through uncaught.
    pub fn merkle_tree(depth: u32) -> Result<Self, PipelineError> {
        if depth == 0 || depth > 64 {
            return Err(PipelineError::UnsupportedCircuitType {
                circuit_id: "merkle_tree".to_string(),
                circuit_version: 0,
                cause: format!("depth {depth} out of supported range 1..=64"),
            });
        }
        Ok(Self::MerkleTree { depth })
    }

    #[must_use]
    pub fn from_circuit_id(circuit_id: &str) -> Option<Self> {
        match circuit_id {
            "contract_execution" => Some(Self::ContractExecution),
            "aimodel_inference" => Some(Self::AiModelInference),
            _ => None,
        }
    }
}

/// Constraint count a circuit compiles down to. Looked up by circuit id
/// rather than `CircuitKind` directly so a scheme provider's `setup` can
/// resolve it without constructing a `MerkleTree` variant out of thin air.
pub(crate) fn constraint_count_for(circuit_id: &str) -> Result<u64, PipelineError> {
    match CircuitKind::from_circuit_id(circuit_id).ok_or_else(|| PipelineError::CircuitNotFound {
        circuit_id: circuit_id.to_string(),
        circuit_version: 0,
    })? {
        CircuitKind::ContractExecution => Ok(4096),
        CircuitKind::AiModelInference => Ok(65536),
        CircuitKind::MerkleTree { depth } => Ok(u64::from(depth) * 256),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvingKey {
    pub circuit_id: String,
    pub circuit_version: u32,
    pub curve: Curve,
    pub constraint_count: u64,
    pub material: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyingKey {
    pub circuit_id: String,
    pub circuit_version: u32,
    pub curve: Curve,
    pub constraint_count: u64,
    pub material: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Witness {
    pub circuit_id: String,
    pub circuit_version: u32,
    pub assignments: Vec<u8>,
}

type CacheKey = (String, u32, Curve);

#[derive(Default)]
pub struct CircuitManager {
    cache: Mutex<HashMap<CacheKey, Arc<(ProvingKey, VerifyingKey)>>>,
}

impl CircuitManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached key pair for `(circuit_id, circuit_version, curve)`,
    /// compiling it via `provider.setup` on a cache miss. The provider is
    /// the source of truth for key material: different proving schemes have
    /// different (real) setup procedures, so the manager only caches, it
    /// never synthesizes keys itself.
    pub fn get_or_compile(
        &self,
        circuit_id: &str,
        circuit_version: u32,
        curve: Curve,
        provider: &dyn ProvingSchemeProvider,
    ) -> Result<Arc<(ProvingKey, VerifyingKey)>, PipelineError> {
        let key = (circuit_id.to_string(), circuit_version, curve);
        {
            let cache = self.cache.lock().expect("circuit cache poisoned");
            if let Some(keys) = cache.get(&key) {
                return Ok(Arc::clone(keys));
            }
        }
        let (proving_key, verifying_key) = provider.setup(circuit_id, circuit_version, curve)?;
        let keys = Arc::new((proving_key, verifying_key));
        let mut cache = self.cache.lock().expect("circuit cache poisoned");
        let mut replacement = (*cache).clone();
        replacement.insert(key, Arc::clone(&keys));
        *cache = replacement;
        Ok(keys)
    }
}

/// Builds the witness assignments from a task's recorded execution trace.
/// Each circuit kind has its own notion of what the trace must contain.
pub fn build_witness(task: &Task, kind: CircuitKind) -> Result<Witness, PipelineError> {
    let circuit_id = task.input.circuit_id.clone();
    let circuit_version = task.input.circuit_version;
    match kind {
        CircuitKind::ContractExecution => {
            if task.execution_trace.is_empty() {
                return Err(PipelineError::InvalidWitness {
                    circuit_id,
                    circuit_version,
                    cause: "contract execution requires at least one host function call".to_string(),
                });
            }
            Ok(Witness { circuit_id, circuit_version, assignments: flatten_trace(&task.execution_trace) })
        }
        CircuitKind::AiModelInference => {
            if task.input.private_inputs.is_empty() {
                return Err(PipelineError::InvalidWitness {
                    circuit_id,
                    circuit_version,
                    cause: "ai model inference requires private model weights or activations".to_string(),
                });
            }
            let mut assignments = task.input.private_inputs.clone();
            assignments.extend(flatten_trace(&task.execution_trace));
            Ok(Witness { circuit_id, circuit_version, assignments })
        }
        CircuitKind::MerkleTree { depth } => {
            let expected = depth as usize;
            if task.input.public_inputs.len() < expected {
                return Err(PipelineError::InvalidWitness {
                    circuit_id,
                    circuit_version,
                    cause: format!("merkle tree of depth {depth} requires {expected} sibling hashes, got {}", task.input.public_inputs.len()),
                });
            }
            Ok(Witness { circuit_id, circuit_version, assignments: task.input.public_inputs.concat() })
        }
    }
}

fn flatten_trace(trace: &[HostFunctionCall]) -> Vec<u8> {
    let mut out = Vec::new();
    for call in trace {
        out.extend_from_slice(call.name.as_bytes());
        out.extend_from_slice(&call.args);
        out.extend_from_slice(&call.result);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proving::Groth16Provider;
    use crate::types::ZKProofInput;
    use chain_types::Hash256;

    fn task_with_trace(circuit_id: &str, trace: Vec<HostFunctionCall>, private_inputs: Vec<u8>) -> Task {
        let mut task = Task::new(
            ZKProofInput { circuit_id: circuit_id.to_string(), circuit_version: 1, public_inputs: vec![], private_inputs },
            Hash256::zero(),
            0,
            i64::MAX,
        );
        task.execution_trace = trace;
        task
    }

    #[test]
    fn merkle_tree_rejects_invalid_depth() {
        assert!(CircuitKind::merkle_tree(0).is_err());
        assert!(CircuitKind::merkle_tree(65).is_err());
        assert!(CircuitKind::merkle_tree(32).is_ok());
    }

    #[test]
    fn contract_execution_requires_nonempty_trace() {
        let task = task_with_trace("contract_execution", vec![], vec![]);
        let err = build_witness(&task, CircuitKind::ContractExecution).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWitness { .. }));
    }

    #[test]
    fn contract_execution_flattens_trace_into_assignments() {
        let trace = vec![HostFunctionCall { name: "balance_of".to_string(), args: vec![1], result: vec![2] }];
        let task = task_with_trace("contract_execution", trace, vec![]);
        let witness = build_witness(&task, CircuitKind::ContractExecution).unwrap();
        assert!(!witness.assignments.is_empty());
    }

    #[test]
    fn ai_model_requires_private_inputs() {
        let task = task_with_trace("aimodel_inference", vec![], vec![]);
        let err = build_witness(&task, CircuitKind::AiModelInference).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWitness { .. }));
    }

    #[test]
    fn circuit_manager_caches_compiled_keys() {
        let manager = CircuitManager::new();
        let provider = Groth16Provider;
        let a = manager.get_or_compile("contract_execution", 1, Curve::Bn254, &provider).unwrap();
        let b = manager.get_or_compile("contract_execution", 1, Curve::Bn254, &provider).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn circuit_manager_rejects_unknown_circuit() {
        let manager = CircuitManager::new();
        let provider = Groth16Provider;
        let err = manager.get_or_compile("unknown_circuit", 1, Curve::Bn254, &provider).unwrap_err();
        assert!(matches!(err, PipelineError::CircuitNotFound { .. }));
    }
}
