//! Chain state and genesis bootstrap, generalized from a `Blockchain`
//! struct's hard-coded genesis block construction into a configurable,
//! idempotent bootstrap step.

use crate::block::{Block, BlockHeader};
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::{CachedOutput, Category, UtxoEngine};
use chain_types::{Amount, Capabilities, CoreError, CoreResult, ErrorKind, Hash256};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::info;

use crate::storage::StorageKv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Normal,
    Syncing,
    ForkProcessing,
    Error,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub height: u64,
    pub best_block_hash: Hash256,
    pub status: ChainStatus,
    pub is_ready: bool,
}

impl Default for ChainInfo {
    fn default() -> Self {
        Self {
            height: 0,
            best_block_hash: Hash256::zero(),
            status: ChainStatus::Syncing,
            is_ready: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedChainInfo {
    height: u64,
    best_block_hash: [u8; 32],
    status: String,
    is_ready: bool,
}

impl From<&ChainInfo> for PersistedChainInfo {
    fn from(info: &ChainInfo) -> Self {
        Self {
            height: info.height,
            best_block_hash: *info.best_block_hash.as_bytes(),
            status: status_to_str(info.status).to_string(),
            is_ready: info.is_ready,
        }
    }
}

fn status_to_str(status: ChainStatus) -> &'static str {
    match status {
        ChainStatus::Normal => "normal",
        ChainStatus::Syncing => "syncing",
        ChainStatus::ForkProcessing => "fork_processing",
        ChainStatus::Error => "error",
        ChainStatus::Maintenance => "maintenance",
    }
}

fn status_from_str(raw: &str) -> CoreResult<ChainStatus> {
    match raw {
        "normal" => Ok(ChainStatus::Normal),
        "syncing" => Ok(ChainStatus::Syncing),
        "fork_processing" => Ok(ChainStatus::ForkProcessing),
        "error" => Ok(ChainStatus::Error),
        "maintenance" => Ok(ChainStatus::Maintenance),
        other => Err(CoreError::validation("chain:state.status", format!("unknown chain status {other:?}"))),
    }
}

const CHAIN_STATE_KEY: &[u8] = b"chain:state";
const CHAIN_INITIALIZED_KEY: &[u8] = b"chain:initialized";

pub struct ChainState {
    storage: Box<dyn StorageKv>,
    cache: RwLock<ChainInfo>,
}

impl ChainState {
    #[must_use]
    pub fn new(storage: Box<dyn StorageKv>) -> Self {
        let cache = storage
            .get(CHAIN_STATE_KEY)
            .and_then(|bytes| serde_json::from_slice::<PersistedChainInfo>(&bytes).ok())
            .and_then(|persisted| {
                Some(ChainInfo {
                    height: persisted.height,
                    best_block_hash: Hash256::from_bytes(persisted.best_block_hash),
                    status: status_from_str(&persisted.status).ok()?,
                    is_ready: persisted.is_ready,
                })
            })
            .unwrap_or_default();
        Self {
            storage,
            cache: RwLock::new(cache),
        }
    }

    #[must_use]
    pub fn info(&self) -> ChainInfo {
        self.cache.read().expect("chain state lock poisoned").clone()
    }

    fn persist(&self, info: &ChainInfo) {
        let persisted = PersistedChainInfo::from(info);
        self.storage.put(
            CHAIN_STATE_KEY.to_vec(),
            serde_json::to_vec(&persisted).expect("chain info serializes"),
        );
    }

    /// Refuses to change status while a fork resolution already holds
    /// `ForkProcessing`: the fork engine is the sole authority over that
    /// window and transitions out of it through `set_chain_status_unchecked`
    /// instead of this public setter.
    ///
    /// # Errors
    /// Returns `StateConflict` if the current status is `ForkProcessing`.
    pub fn set_chain_status(&self, status: ChainStatus) -> CoreResult<()> {
        let guard = self.cache.read().expect("chain state lock poisoned");
        if guard.status == ChainStatus::ForkProcessing {
            return Err(CoreError::state_conflict("chain:state.status", "chain is locked for fork processing"));
        }
        drop(guard);
        self.set_chain_status_unchecked(status);
        Ok(())
    }

    /// Sets status unconditionally. Only the fork engine, which already
    /// serializes access to this chain's mutation through its own state
    /// machine, is allowed to bypass the `ForkProcessing` guard this way.
    pub(crate) fn set_chain_status_unchecked(&self, status: ChainStatus) {
        let mut guard = self.cache.write().expect("chain state lock poisoned");
        guard.status = status;
        self.persist(&guard);
    }

    /// The chain tip's block hash, as last recorded by `advance`.
    #[must_use]
    pub fn get_best_block_hash(&self) -> Hash256 {
        self.cache.read().expect("chain state lock poisoned").best_block_hash
    }

    /// Whether this chain has completed genesis bootstrap and is tracking a
    /// real tip.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cache.read().expect("chain state lock poisoned").is_ready
    }

    /// Data is fresh when the chain is ready and not mid-fork-resolution or
    /// in an error state: a caller reading `ChainInfo` during either of
    /// those windows is looking at state that may be rolled back.
    #[must_use]
    pub fn is_data_fresh(&self) -> bool {
        let info = self.cache.read().expect("chain state lock poisoned");
        info.is_ready && matches!(info.status, ChainStatus::Normal | ChainStatus::Syncing)
    }

    pub fn advance(&self, height: u64, best_block_hash: Hash256) {
        let mut guard = self.cache.write().expect("chain state lock poisoned");
        guard.height = height;
        guard.best_block_hash = best_block_hash;
        guard.is_ready = true;
        if guard.status == ChainStatus::Syncing {
            guard.status = ChainStatus::Normal;
        }
        self.persist(&guard);
    }

    /// A point-in-time copy of this chain's persisted state and cached
    /// `ChainInfo`, taken by the fork engine before it starts mutating state.
    #[must_use]
    pub fn checkpoint(&self) -> (std::collections::BTreeMap<Vec<u8>, Vec<u8>>, ChainInfo) {
        (self.storage.checkpoint(), self.info())
    }

    pub fn restore(&self, snapshot: (std::collections::BTreeMap<Vec<u8>, Vec<u8>>, ChainInfo)) {
        self.storage.restore_from(snapshot.0);
        *self.cache.write().expect("chain state lock poisoned") = snapshot.1;
    }

    /// True when the store has never been initialized, or height is zero
    /// with no best-block hash recorded.
    #[must_use]
    pub fn needs_genesis(&self) -> bool {
        if self.storage.get(CHAIN_INITIALIZED_KEY).is_none() {
            return true;
        }
        let info = self.info();
        info.height == 0 && info.best_block_hash.is_zero()
    }

    /// Bootstraps the chain from `cfg` if it hasn't been initialized yet.
    /// Idempotent: returns `Ok(false)` without emitting any side effect on
    /// a second call against an already-initialized chain.
    ///
    /// # Errors
    /// Returns a `Validation` error if `cfg` names zero accounts or an
    /// account with an unparsable balance.
    pub fn initialize_genesis_if_needed(
        &self,
        cfg: &GenesisConfig,
        utxo_engine: &UtxoEngine,
        caps: &dyn Capabilities,
    ) -> CoreResult<bool> {
        if !self.needs_genesis() {
            return Ok(false);
        }
        if cfg.accounts.is_empty() {
            return Err(CoreError::validation("genesis_config.accounts", "genesis requires at least one account"));
        }

        let mut outputs = Vec::with_capacity(cfg.accounts.len());
        for account in &cfg.accounts {
            let amount: Amount = chain_types::parse_minimal_units(&account.initial_balance)
                .map_err(|e| CoreError::validation(account.public_key.clone(), e.to_string()))?;
            outputs.push(TxOutput {
                category: Category::Asset,
                owner_address: account.public_key.as_bytes().to_vec(),
                cached_output: CachedOutput::NativeCoin { amount },
                locking_conditions: vec![],
            });
        }
        let genesis_tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs,
            lock_time: 0,
        };
        let merkle_root = Block::calculate_merkle_root(std::slice::from_ref(&genesis_tx), caps);
        let block = Block {
            header: BlockHeader {
                height: 0,
                previous_hash: Hash256::zero(),
                merkle_root,
                timestamp: cfg.timestamp,
                chain_id: cfg.chain_id,
                nonce: 0,
            },
            transactions: vec![genesis_tx],
        };

        let (inputs, block_outputs) = block.utxo_effects(caps);
        debug_assert!(inputs.is_empty(), "genesis transactions never spend");
        utxo_engine.apply_block(&inputs, &block_outputs, 0, cfg.timestamp)?;

        let tx_bytes = serde_json::to_vec(&block.transactions[0]).expect("transaction serializes");
        let best_block_hash = caps.hash().hash(&tx_bytes);
        self.storage.put(CHAIN_INITIALIZED_KEY.to_vec(), vec![1]);
        self.advance(0, best_block_hash);
        info!(chain_id = cfg.chain_id, accounts = cfg.accounts.len(), "genesis initialized");
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub public_key: String,
    pub initial_balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: u64,
    pub network_id: String,
    pub timestamp: i64,
    pub accounts: Vec<GenesisAccount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use chain_types::DefaultCapabilities;

    fn cfg() -> GenesisConfig {
        GenesisConfig {
            chain_id: 1,
            network_id: "test".to_string(),
            timestamp: 1_000,
            accounts: vec![
                GenesisAccount { public_key: "alice".to_string(), initial_balance: "1000000".to_string() },
                GenesisAccount { public_key: "bob".to_string(), initial_balance: "500000".to_string() },
            ],
        }
    }

    #[test]
    fn fresh_store_needs_genesis() {
        let state = ChainState::new(Box::new(MemStore::new()));
        assert!(state.needs_genesis());
    }

    #[test]
    fn initializing_genesis_creates_utxos_and_marks_ready() {
        let state = ChainState::new(Box::new(MemStore::new()));
        let utxo_engine = UtxoEngine::new(Box::new(MemStore::new()));
        let caps = DefaultCapabilities;

        let created = state.initialize_genesis_if_needed(&cfg(), &utxo_engine, &caps).unwrap();
        assert!(created);
        assert!(!state.needs_genesis());
        assert!(state.info().is_ready);
        assert_eq!(utxo_engine.find_by_address(b"alice").len(), 1);
        assert_eq!(utxo_engine.find_by_address(b"bob").len(), 1);
    }

    #[test]
    fn second_call_is_idempotent() {
        let state = ChainState::new(Box::new(MemStore::new()));
        let utxo_engine = UtxoEngine::new(Box::new(MemStore::new()));
        let caps = DefaultCapabilities;

        state.initialize_genesis_if_needed(&cfg(), &utxo_engine, &caps).unwrap();
        let second = state.initialize_genesis_if_needed(&cfg(), &utxo_engine, &caps).unwrap();
        assert!(!second);
    }

    #[test]
    fn best_block_hash_and_is_ready_reflect_advance() {
        let state = ChainState::new(Box::new(MemStore::new()));
        assert!(!state.is_ready());
        assert_eq!(state.get_best_block_hash(), Hash256::zero());

        let hash = Hash256::keccak256(b"tip");
        state.advance(5, hash);
        assert!(state.is_ready());
        assert_eq!(state.get_best_block_hash(), hash);
    }

    #[test]
    fn data_is_not_fresh_while_fork_processing() {
        let state = ChainState::new(Box::new(MemStore::new()));
        state.advance(1, Hash256::keccak256(b"tip"));
        assert!(state.is_data_fresh());

        state.set_chain_status_unchecked(ChainStatus::ForkProcessing);
        assert!(!state.is_data_fresh());
    }

    #[test]
    fn set_chain_status_refuses_while_fork_processing() {
        let state = ChainState::new(Box::new(MemStore::new()));
        state.set_chain_status_unchecked(ChainStatus::ForkProcessing);
        let err = state.set_chain_status(ChainStatus::Normal).unwrap_err();
        assert_eq!(err.kind, ErrorKind::StateConflict);
    }

    #[test]
    fn rejects_empty_account_list() {
        let state = ChainState::new(Box::new(MemStore::new()));
        let utxo_engine = UtxoEngine::new(Box::new(MemStore::new()));
        let caps = DefaultCapabilities;
        let mut empty_cfg = cfg();
        empty_cfg.accounts.clear();

        let err = state.initialize_genesis_if_needed(&empty_cfg, &utxo_engine, &caps).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
