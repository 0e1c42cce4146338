//! Retry policy and post-proof self-verification, kept separate from the
//! worker loop so the backoff schedule and retryability rules can be tested
//! in isolation.

use crate::circuits::VerifyingKey;
use crate::error::PipelineError;
use crate::proving::ProvingSchemeProvider;
use crate::types::StateProof;
use chain_types::Capabilities;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ReliabilityConfig {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self { base_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(5), max_attempts: 3 }
    }
}

/// Backoff distinct from a `Task`'s own `retry_count`/`max_retries`: this
/// governs retries of a single worker's attempt to produce a proof, while
/// the task-level counter governs re-enqueueing the whole task after it's
/// given up entirely.
pub struct ReliabilityEnforcer {
    config: ReliabilityConfig,
}

impl ReliabilityEnforcer {
    #[must_use]
    pub fn new(config: ReliabilityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.config.base_backoff.as_millis().saturating_mul(1u128 << attempt.min(16));
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)).min(self.config.max_backoff)
    }

    #[must_use]
    pub fn is_retryable(&self, error: &PipelineError) -> bool {
        error.is_retryable()
    }

    /// Runs `attempt` until it succeeds, exhausts `max_attempts`, or returns
    /// a non-retryable error. Sleeps between attempts using the exponential
    /// backoff schedule.
    pub fn run_with_retry<T>(&self, mut attempt: impl FnMut(u32) -> Result<T, PipelineError>) -> Result<T, PipelineError> {
        let mut last_err = None;
        for n in 0..self.config.max_attempts {
            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(e) if self.is_retryable(&e) && n + 1 < self.config.max_attempts => {
                    thread::sleep(self.backoff_for_attempt(n));
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.expect("loop always runs at least once"))
    }

    /// Verifies a freshly generated proof before it ever reaches a caller,
    /// so a prover bug surfaces as a generation failure rather than a
    /// silently wrong proof being handed out.
    pub fn self_verify(
        &self,
        provider: &dyn ProvingSchemeProvider,
        verifying_key: &VerifyingKey,
        proof: &StateProof,
        caps: &dyn Capabilities,
    ) -> Result<(), PipelineError> {
        let ok = provider.verify(verifying_key, proof, caps)?;
        if !ok {
            return Err(PipelineError::ProofVerificationFailed {
                circuit_id: verifying_key.circuit_id.clone(),
                circuit_version: verifying_key.circuit_version,
                cause: "self-verification of freshly generated proof failed".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let enforcer = ReliabilityEnforcer::new(ReliabilityConfig { base_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(5), max_attempts: 3 });
        assert_eq!(enforcer.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(enforcer.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(enforcer.backoff_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn run_with_retry_gives_up_after_max_attempts() {
        let enforcer = ReliabilityEnforcer::new(ReliabilityConfig { base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_attempts: 3 });
        let mut calls = 0;
        let result: Result<(), PipelineError> = enforcer.run_with_retry(|_n| {
            calls += 1;
            Err(PipelineError::ProofGenerationFailed { circuit_id: "c".to_string(), circuit_version: 1, cause: "timeout waiting for prover".to_string() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn run_with_retry_stops_immediately_on_non_retryable_error() {
        let enforcer = ReliabilityEnforcer::new(ReliabilityConfig::default());
        let mut calls = 0;
        let result: Result<(), PipelineError> = enforcer.run_with_retry(|_n| {
            calls += 1;
            Err(PipelineError::InvalidWitness { circuit_id: "c".to_string(), circuit_version: 1, cause: "bad".to_string() })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn run_with_retry_succeeds_after_transient_failure() {
        let enforcer = ReliabilityEnforcer::new(ReliabilityConfig { base_backoff: Duration::from_millis(1), max_backoff: Duration::from_millis(5), max_attempts: 3 });
        let mut calls = 0;
        let result = enforcer.run_with_retry(|_n| {
            calls += 1;
            if calls < 2 {
                Err(PipelineError::ProofGenerationFailed { circuit_id: "c".to_string(), circuit_version: 1, cause: "timeout waiting for prover".to_string() })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
    }
}
