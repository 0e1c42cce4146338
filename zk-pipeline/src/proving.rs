//! Pluggable proving schemes. Real SNARK backends (arkworks, bellman, ...)
//! would sit behind this trait; the two providers here produce
//! deterministic placeholder artifacts so the rest of the pipeline
//! (queueing, scheduling, retries, verification wiring) can be built and
//! tested without vendoring a proving library.

use crate::circuits::{constraint_count_for, ProvingKey, VerifyingKey, Witness};
use crate::error::PipelineError;
use crate::types::{Curve, ProvingScheme, StateProof};
use chain_types::{Capabilities, Hash256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub trait ProvingSchemeProvider: Send + Sync {
    fn scheme(&self) -> ProvingScheme;

    /// Derives a fresh proving/verifying key pair for a circuit. Real
    /// backends would run a (possibly externally-supplied) trusted setup
    /// here; the placeholder providers below derive deterministic key
    /// material from the circuit identity and the scheme itself, so two
    /// calls with the same arguments always agree.
    fn setup(&self, circuit_id: &str, circuit_version: u32, curve: Curve) -> Result<(ProvingKey, VerifyingKey), PipelineError> {
        let constraint_count = constraint_count_for(circuit_id)?;
        let material = format!("{circuit_id}:{circuit_version}:{:?}:{:?}", self.scheme(), curve).into_bytes();
        Ok((
            ProvingKey { circuit_id: circuit_id.to_string(), circuit_version, curve, constraint_count, material: material.clone() },
            VerifyingKey { circuit_id: circuit_id.to_string(), circuit_version, curve, constraint_count, material },
        ))
    }

    fn prove(
        &self,
        proving_key: &ProvingKey,
        witness: &Witness,
        public_inputs: &[Vec<u8>],
        caps: &dyn Capabilities,
    ) -> Result<StateProof, PipelineError>;

    fn verify(&self, verifying_key: &VerifyingKey, proof: &StateProof, caps: &dyn Capabilities) -> Result<bool, PipelineError>;

    fn serialize_proving_key(&self, key: &ProvingKey) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(key).map_err(|e| PipelineError::CircuitCompilationFailed {
            circuit_id: key.circuit_id.clone(),
            circuit_version: key.circuit_version,
            cause: format!("proving key serialization failed: {e}"),
        })
    }

    fn deserialize_proving_key(&self, bytes: &[u8]) -> Result<ProvingKey, PipelineError> {
        serde_json::from_slice(bytes).map_err(|e| PipelineError::CircuitCompilationFailed {
            circuit_id: "unknown".to_string(),
            circuit_version: 0,
            cause: format!("proving key deserialization failed: {e}"),
        })
    }

    fn serialize_verifying_key(&self, key: &VerifyingKey) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(key).map_err(|e| PipelineError::CircuitCompilationFailed {
            circuit_id: key.circuit_id.clone(),
            circuit_version: key.circuit_version,
            cause: format!("verifying key serialization failed: {e}"),
        })
    }

    fn deserialize_verifying_key(&self, bytes: &[u8]) -> Result<VerifyingKey, PipelineError> {
        serde_json::from_slice(bytes).map_err(|e| PipelineError::CircuitCompilationFailed {
            circuit_id: "unknown".to_string(),
            circuit_version: 0,
            cause: format!("verifying key deserialization failed: {e}"),
        })
    }

    fn serialize_proof(&self, proof: &StateProof) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(proof).map_err(|e| PipelineError::InvalidProof {
            circuit_id: proof.circuit_id.clone(),
            circuit_version: proof.circuit_version,
            cause: format!("proof serialization failed: {e}"),
        })
    }

    fn deserialize_proof(&self, bytes: &[u8]) -> Result<StateProof, PipelineError> {
        serde_json::from_slice(bytes).map_err(|e| PipelineError::InvalidProof {
            circuit_id: "unknown".to_string(),
            circuit_version: 0,
            cause: format!("proof deserialization failed: {e}"),
        })
    }
}

fn verification_key_hash(material: &[u8], caps: &dyn Capabilities) -> Hash256 {
    caps.hash().hash(material)
}

/// Produces a proof artifact whose bytes are the hash of the witness
/// assignments and public inputs, tagged with the scheme so `verify` can
/// recompute and compare. The verification-key hash is taken from the
/// proving key's own material: `setup` derives both halves of a pair from
/// the same bytes, so this is exactly the hash `placeholder_verify` will
/// recompute from the matching `VerifyingKey`.
fn placeholder_prove(
    scheme: ProvingScheme,
    proving_key: &ProvingKey,
    witness: &Witness,
    public_inputs: &[Vec<u8>],
    caps: &dyn Capabilities,
) -> StateProof {
    let mut payload = witness.assignments.clone();
    for input in public_inputs {
        payload.extend_from_slice(input);
    }
    let digest = caps.hash().hash(&payload);
    StateProof {
        proof: digest.as_bytes().to_vec(),
        public_inputs: public_inputs.to_vec(),
        proving_scheme: scheme,
        curve: proving_key.curve,
        verification_key_hash: verification_key_hash(&proving_key.material, caps),
        circuit_id: proving_key.circuit_id.clone(),
        circuit_version: proving_key.circuit_version,
        constraint_count: proving_key.constraint_count,
    }
}

fn placeholder_verify(verifying_key: &VerifyingKey, proof: &StateProof, caps: &dyn Capabilities) -> bool {
    if proof.circuit_id != verifying_key.circuit_id || proof.circuit_version != verifying_key.circuit_version {
        return false;
    }
    let expected_vk_hash = verification_key_hash(&verifying_key.material, caps);
    proof.verification_key_hash == expected_vk_hash
}

pub struct Groth16Provider;

impl ProvingSchemeProvider for Groth16Provider {
    fn scheme(&self) -> ProvingScheme {
        ProvingScheme::Groth16
    }

    fn prove(
        &self,
        proving_key: &ProvingKey,
        witness: &Witness,
        public_inputs: &[Vec<u8>],
        caps: &dyn Capabilities,
    ) -> Result<StateProof, PipelineError> {
        if witness.circuit_id != proving_key.circuit_id || witness.circuit_version != proving_key.circuit_version {
            return Err(PipelineError::CircuitParametersMismatch {
                circuit_id: proving_key.circuit_id.clone(),
                circuit_version: proving_key.circuit_version,
                cause: "witness was built for a different circuit".to_string(),
            });
        }
        Ok(placeholder_prove(ProvingScheme::Groth16, proving_key, witness, public_inputs, caps))
    }

    fn verify(&self, verifying_key: &VerifyingKey, proof: &StateProof, caps: &dyn Capabilities) -> Result<bool, PipelineError> {
        if proof.proving_scheme != ProvingScheme::Groth16 {
            return Err(PipelineError::InvalidProof {
                circuit_id: verifying_key.circuit_id.clone(),
                circuit_version: verifying_key.circuit_version,
                cause: "proof was not produced by groth16".to_string(),
            });
        }
        Ok(placeholder_verify(verifying_key, proof, caps))
    }
}

pub struct PlonkProvider;

impl ProvingSchemeProvider for PlonkProvider {
    fn scheme(&self) -> ProvingScheme {
        ProvingScheme::Plonk
    }

    fn prove(
        &self,
        proving_key: &ProvingKey,
        witness: &Witness,
        public_inputs: &[Vec<u8>],
        caps: &dyn Capabilities,
    ) -> Result<StateProof, PipelineError> {
        if witness.circuit_id != proving_key.circuit_id || witness.circuit_version != proving_key.circuit_version {
            return Err(PipelineError::CircuitParametersMismatch {
                circuit_id: proving_key.circuit_id.clone(),
                circuit_version: proving_key.circuit_version,
                cause: "witness was built for a different circuit".to_string(),
            });
        }
        Ok(placeholder_prove(ProvingScheme::Plonk, proving_key, witness, public_inputs, caps))
    }

    fn verify(&self, verifying_key: &VerifyingKey, proof: &StateProof, caps: &dyn Capabilities) -> Result<bool, PipelineError> {
        if proof.proving_scheme != ProvingScheme::Plonk {
            return Err(PipelineError::InvalidProof {
                circuit_id: verifying_key.circuit_id.clone(),
                circuit_version: verifying_key.circuit_version,
                cause: "proof was not produced by plonk".to_string(),
            });
        }
        Ok(placeholder_verify(verifying_key, proof, caps))
    }
}

/// Insert-once registry: once a scheme name is registered it cannot be
/// silently replaced, so two components can't disagree about which
/// implementation backs e.g. `"groth16"`.
#[derive(Default)]
pub struct SchemeRegistry {
    providers: RwLock<HashMap<&'static str, Arc<dyn ProvingSchemeProvider>>>,
}

impl SchemeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("groth16", Arc::new(Groth16Provider)).expect("default registration cannot collide");
        registry.register("plonk", Arc::new(PlonkProvider)).expect("default registration cannot collide");
        registry
    }

    pub fn register(&self, name: &'static str, provider: Arc<dyn ProvingSchemeProvider>) -> Result<(), PipelineError> {
        let mut providers = self.providers.write().expect("scheme registry poisoned");
        if providers.contains_key(name) {
            return Err(PipelineError::UnsupportedCircuitType {
                circuit_id: name.to_string(),
                circuit_version: 0,
                cause: "proving scheme already registered".to_string(),
            });
        }
        providers.insert(name, provider);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProvingSchemeProvider>> {
        self.providers.read().expect("scheme registry poisoned").get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuits::Witness;
    use chain_types::DefaultCapabilities;

    fn proving_key() -> ProvingKey {
        ProvingKey {
            circuit_id: "contract_execution".to_string(),
            circuit_version: 1,
            curve: Curve::Bn254,
            constraint_count: 4096,
            material: b"material".to_vec(),
        }
    }

    #[test]
    fn groth16_round_trips_prove_and_verify() {
        let caps = DefaultCapabilities;
        let provider = Groth16Provider;
        let pk = proving_key();
        let vk = VerifyingKey { circuit_id: pk.circuit_id.clone(), circuit_version: pk.circuit_version, curve: pk.curve, constraint_count: pk.constraint_count, material: pk.material.clone() };
        let witness = Witness { circuit_id: pk.circuit_id.clone(), circuit_version: pk.circuit_version, assignments: vec![1, 2, 3] };
        let proof = provider.prove(&pk, &witness, &[], &caps).unwrap();
        assert!(provider.verify(&vk, &proof, &caps).unwrap());
    }

    #[test]
    fn plonk_rejects_groth16_proof() {
        let caps = DefaultCapabilities;
        let pk = proving_key();
        let vk = VerifyingKey { circuit_id: pk.circuit_id.clone(), circuit_version: pk.circuit_version, curve: pk.curve, constraint_count: pk.constraint_count, material: pk.material.clone() };
        let witness = Witness { circuit_id: pk.circuit_id.clone(), circuit_version: pk.circuit_version, assignments: vec![1] };
        let proof = Groth16Provider.prove(&pk, &witness, &[], &caps).unwrap();
        let err = PlonkProvider.verify(&vk, &proof, &caps).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidProof { .. }));
    }

    #[test]
    fn registry_rejects_duplicate_registration() {
        let registry = SchemeRegistry::with_defaults();
        let err = registry.register("groth16", Arc::new(Groth16Provider)).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedCircuitType { .. }));
    }

    #[test]
    fn registry_resolves_by_name() {
        let registry = SchemeRegistry::with_defaults();
        assert!(registry.get("plonk").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn setup_is_deterministic_for_the_same_arguments() {
        let a = Groth16Provider.setup("contract_execution", 1, Curve::Bn254).unwrap();
        let b = Groth16Provider.setup("contract_execution", 1, Curve::Bn254).unwrap();
        assert_eq!(a.0.material, b.0.material);
        assert_eq!(a.1.material, b.1.material);
    }

    #[test]
    fn setup_differs_across_schemes() {
        let groth16 = Groth16Provider.setup("contract_execution", 1, Curve::Bn254).unwrap();
        let plonk = PlonkProvider.setup("contract_execution", 1, Curve::Bn254).unwrap();
        assert_ne!(groth16.0.material, plonk.0.material);
    }

    #[test]
    fn verify_rejects_a_proof_bound_to_a_different_verifying_key() {
        let caps = DefaultCapabilities;
        let provider = Groth16Provider;
        let pk = proving_key();
        let witness = Witness { circuit_id: pk.circuit_id.clone(), circuit_version: pk.circuit_version, assignments: vec![1, 2, 3] };
        let proof = provider.prove(&pk, &witness, &[], &caps).unwrap();
        let substituted_vk = VerifyingKey {
            circuit_id: pk.circuit_id.clone(),
            circuit_version: pk.circuit_version,
            curve: pk.curve,
            constraint_count: pk.constraint_count,
            material: b"different material".to_vec(),
        };
        assert!(!provider.verify(&substituted_vk, &proof, &caps).unwrap());
    }

    #[test]
    fn proving_key_round_trips_through_serialization() {
        let provider = Groth16Provider;
        let pk = proving_key();
        let bytes = provider.serialize_proving_key(&pk).unwrap();
        let restored = provider.deserialize_proving_key(&bytes).unwrap();
        assert_eq!(restored.circuit_id, pk.circuit_id);
        assert_eq!(restored.material, pk.material);
    }
}
