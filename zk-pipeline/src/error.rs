//! Closed error taxonomy for the proof pipeline. Distinct from `chain-types`'
//! `CoreError` because these failures are about circuits and proofs, not
//! about chain state.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("circuit not found: {circuit_id} v{circuit_version}")]
    CircuitNotFound { circuit_id: String, circuit_version: u32 },

    #[error("circuit compilation failed for {circuit_id} v{circuit_version}: {cause}")]
    CircuitCompilationFailed { circuit_id: String, circuit_version: u32, cause: String },

    #[error("proof generation failed for {circuit_id} v{circuit_version}: {cause}")]
    ProofGenerationFailed { circuit_id: String, circuit_version: u32, cause: String },

    #[error("proof verification failed for {circuit_id} v{circuit_version}: {cause}")]
    ProofVerificationFailed { circuit_id: String, circuit_version: u32, cause: String },

    #[error("invalid witness for {circuit_id} v{circuit_version}: {cause}")]
    InvalidWitness { circuit_id: String, circuit_version: u32, cause: String },

    #[error("invalid public inputs for {circuit_id} v{circuit_version}: {cause}")]
    InvalidPublicInputs { circuit_id: String, circuit_version: u32, cause: String },

    #[error("invalid proof for {circuit_id} v{circuit_version}: {cause}")]
    InvalidProof { circuit_id: String, circuit_version: u32, cause: String },

    #[error("unsupported circuit type for {circuit_id} v{circuit_version}: {cause}")]
    UnsupportedCircuitType { circuit_id: String, circuit_version: u32, cause: String },

    #[error("circuit parameters mismatch for {circuit_id} v{circuit_version}: {cause}")]
    CircuitParametersMismatch { circuit_id: String, circuit_version: u32, cause: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),
}

impl PipelineError {
    #[must_use]
    pub fn circuit_id(&self) -> Option<&str> {
        match self {
            Self::CircuitNotFound { circuit_id, .. }
            | Self::CircuitCompilationFailed { circuit_id, .. }
            | Self::ProofGenerationFailed { circuit_id, .. }
            | Self::ProofVerificationFailed { circuit_id, .. }
            | Self::InvalidWitness { circuit_id, .. }
            | Self::InvalidPublicInputs { circuit_id, .. }
            | Self::InvalidProof { circuit_id, .. }
            | Self::UnsupportedCircuitType { circuit_id, .. }
            | Self::CircuitParametersMismatch { circuit_id, .. } => Some(circuit_id),
            Self::TaskNotFound(_) => None,
        }
    }

    /// A failure is retryable only if its cause names a known-transient
    /// condition. Anything else — a structural mismatch between witness
    /// and circuit, an unsupported circuit, a cancellation — is not, since
    /// retrying would just reproduce the same failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        let cause = match self {
            Self::CircuitCompilationFailed { cause, .. }
            | Self::ProofGenerationFailed { cause, .. }
            | Self::ProofVerificationFailed { cause, .. } => cause,
            Self::InvalidWitness { .. }
            | Self::InvalidPublicInputs { .. }
            | Self::InvalidProof { .. }
            | Self::UnsupportedCircuitType { .. }
            | Self::CircuitParametersMismatch { .. }
            | Self::CircuitNotFound { .. }
            | Self::TaskNotFound(_) => return false,
        };
        const RETRYABLE_SUBSTRINGS: [&str; 4] = ["timeout", "temporary", "circuit compilation", "witness building"];
        if cause.contains("cancel") {
            return false;
        }
        RETRYABLE_SUBSTRINGS.iter().any(|needle| cause.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_timeout_is_retryable() {
        let err = PipelineError::ProofGenerationFailed {
            circuit_id: "contract_execution".to_string(),
            circuit_version: 1,
            cause: "timeout waiting for worker slot".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn generation_failure_without_known_cause_is_not_retryable() {
        let err = PipelineError::ProofGenerationFailed {
            circuit_id: "contract_execution".to_string(),
            circuit_version: 1,
            cause: "worker pool exhausted".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn parameters_mismatch_is_never_retryable() {
        let err = PipelineError::CircuitParametersMismatch {
            circuit_id: "contract_execution".to_string(),
            circuit_version: 1,
            cause: "constraint count mismatch".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_witness_is_never_retryable() {
        let err = PipelineError::InvalidWitness {
            circuit_id: "aimodel_inference".to_string(),
            circuit_version: 2,
            cause: "missing trace entries".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
