pub mod balance;
pub mod block;
pub mod chain;
pub mod compute;
pub mod events;
pub mod fork;
pub mod storage;
pub mod transaction;
pub mod utxo;

pub use balance::{BalanceView, BalanceWarning, EffectiveBalance, LockedEntry, MempoolView, PendingEntry};
pub use block::{Block, BlockHeader};
pub use chain::{ChainInfo, ChainStatus, ChainState, GenesisAccount, GenesisConfig};
pub use compute::{compute_units, CuParams, ResourceType};
pub use events::{EventBus, EventPayload, EventTopic, InMemoryEventBus, NetworkRouter, TxStatus};
pub use fork::{should_process_fork, should_switch_chain, ForkEngine, ForkInfo, ForkOutcome, ForkState};
pub use storage::{MemStore, StorageKv, Txn};
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{
    BlockInputEffect, BlockOutputEffect, CachedOutput, Category, LockingCondition, OutPoint, TokenId, Utxo,
    UtxoChangeEvent, UtxoEngine, UtxoOp, UtxoStatus,
};
