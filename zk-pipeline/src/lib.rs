pub mod circuits;
pub mod error;
pub mod pipeline;
pub mod proving;
pub mod queue;
pub mod reliability;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use circuits::{build_witness, CircuitKind, CircuitManager, ProvingKey, VerifyingKey, Witness};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineConfig};
pub use proving::{Groth16Provider, PlonkProvider, ProvingSchemeProvider, SchemeRegistry};
pub use queue::{QueueStats, TaskQueue};
pub use reliability::{ReliabilityConfig, ReliabilityEnforcer};
pub use scheduler::{ExecutionTimeStrategy, MixedStrategy, PriorityScheduler, PriorityStrategy, TransactionTypeStrategy, WaitTimeStrategy};
pub use types::{Curve, ExecutionId, HostFunctionCall, ProvingScheme, StateProof, Task, TaskId, TaskStatus, ZKProofInput};
pub use worker::{WorkerHealth, WorkerPool};
