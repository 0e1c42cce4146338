//! The UTXO data model and the lifecycle engine that owns it.
//!
//! Generalizes a single native-coin `Utxo`/`OutPoint`/`UtxoSet` model from
//! a single balance into the full asset/resource/state taxonomy, and
//! replaces an in-process `HashMap` with the `StorageKv` contract so the
//! engine never shares UTXO objects by pointer.

use crate::storage::StorageKv;
use chain_types::{Amount, CoreError, CoreResult, Hash256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Globally unique identifier of a UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_id: Hash256,
    pub output_index: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(tx_id: Hash256, output_index: u32) -> Self {
        Self { tx_id, output_index }
    }

    /// The byte key used to key UTXO and index entries: the transaction id
    /// followed by the big-endian output index.
    #[must_use]
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(self.tx_id.as_bytes());
        key.extend_from_slice(&self.output_index.to_be_bytes());
        key
    }
}

/// Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Asset,
    Resource,
    State,
    Unknown,
}

/// Disambiguates contract-issued tokens, compared by full byte equality for
/// fungible/NFT ids and by `batch_id` for semi-fungible ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenId {
    FungibleClassId(Vec<u8>),
    NftUniqueId(Vec<u8>),
    SemiFungible { batch_id: Vec<u8>, serial: u64 },
}

impl TokenId {
    /// The aggregation key balance queries group by.
    #[must_use]
    pub fn aggregation_key(&self) -> Vec<u8> {
        match self {
            Self::FungibleClassId(bytes) | Self::NftUniqueId(bytes) => bytes.clone(),
            Self::SemiFungible { batch_id, .. } => batch_id.clone(),
        }
    }
}

/// The originating transaction output content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachedOutput {
    NativeCoin { amount: Amount },
    ContractToken { token_id: TokenId, amount: Amount },
    Resource { descriptor: Vec<u8> },
    State { cell: Vec<u8> },
    /// In-memory sentinel for a UTXO whose output content failed to
    /// deserialize. Never persisted; balance aggregation treats it as zero
    /// while recording a warning.
    Missing,
}

impl CachedOutput {
    #[must_use]
    pub fn amount(&self) -> Amount {
        match self {
            Self::NativeCoin { amount } | Self::ContractToken { amount, .. } => *amount,
            Self::Resource { .. } | Self::State { .. } | Self::Missing => 0,
        }
    }

    #[must_use]
    pub fn token_id(&self) -> Option<&TokenId> {
        match self {
            Self::ContractToken { token_id, .. } => Some(token_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockingCondition {
    TimeLock { unlock_timestamp: u64 },
    HeightLock { unlock_height: u64 },
    MultiSig { required: u32, signers: Vec<Vec<u8>> },
    ContractLock { contract_ref: Vec<u8> },
}

impl LockingCondition {
    /// Whether this condition is still in force at `(current_height,
    /// current_timestamp)` — used by the locked-balance view.
    #[must_use]
    pub fn is_active(&self, current_height: u64, current_timestamp: u64) -> bool {
        match self {
            Self::TimeLock { unlock_timestamp } => current_timestamp < *unlock_timestamp,
            Self::HeightLock { unlock_height } => current_height < *unlock_height,
            Self::MultiSig { .. } | Self::ContractLock { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtxoStatus {
    Available,
    Referenced,
    Consumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub out_point: OutPoint,
    pub category: Category,
    pub owner_address: Vec<u8>,
    pub block_height: u64,
    pub status: UtxoStatus,
    pub created_timestamp: u64,
    pub cached_output: CachedOutput,
    pub locking_conditions: Vec<LockingCondition>,
    /// Number of other UTXOs currently holding a reference to this one.
    /// Transitions `Referenced -> Available` when this reaches zero.
    pub ref_count: u32,
    /// Other UTXOs this one declared a reference-only dependency on when it
    /// was created. Travels with the holder record so the reverse
    /// transition on spend doesn't need a second lookup.
    pub references: Vec<OutPoint>,
}

/// `utxo.state.changed` event payload, emitted by `UtxoEngine::apply_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoChangeEvent {
    pub utxo_hash: OutPoint,
    pub operation: UtxoOp,
    pub tx_hash: Hash256,
    pub block_height: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtxoOp {
    Created,
    Spent,
    Locked,
    Unlocked,
}

mod keys {
    pub fn utxo(out_point_key: &[u8]) -> Vec<u8> {
        let mut key = b"utxo:set:".to_vec();
        key.extend_from_slice(out_point_key);
        key
    }

    pub fn by_address(address: &[u8], out_point_key: &[u8]) -> Vec<u8> {
        let mut key = b"index:address:".to_vec();
        key.extend_from_slice(address);
        key.push(b':');
        key.extend_from_slice(out_point_key);
        key
    }

    pub fn by_asset(token_key: &[u8], out_point_key: &[u8]) -> Vec<u8> {
        let mut key = b"index:asset:".to_vec();
        key.extend_from_slice(token_key);
        key.push(b':');
        key.extend_from_slice(out_point_key);
        key
    }

    pub fn by_height(height: u64, out_point_key: &[u8]) -> Vec<u8> {
        let mut key = b"index:height:".to_vec();
        key.extend_from_slice(&height.to_be_bytes());
        key.push(b':');
        key.extend_from_slice(out_point_key);
        key
    }

    pub fn address_prefix(address: &[u8]) -> Vec<u8> {
        let mut key = b"index:address:".to_vec();
        key.extend_from_slice(address);
        key.push(b':');
        key
    }

    pub fn asset_prefix(token_key: &[u8]) -> Vec<u8> {
        let mut key = b"index:asset:".to_vec();
        key.extend_from_slice(token_key);
        key.push(b':');
        key
    }
}

/// Owns the UTXO set and its address/asset/height indexes, applying block
/// effects as a single atomic batch.
pub struct UtxoEngine {
    storage: Box<dyn StorageKv>,
    /// Set by the fork engine while it holds `ChainStatus::ForkProcessing`,
    /// so a concurrent block-acceptance caller can't mutate the set out
    /// from under an in-progress reconstruction. The fork engine's own
    /// reconstruction bypasses it via `apply_block_unchecked`.
    locked: AtomicBool,
}

impl UtxoEngine {
    #[must_use]
    pub fn new(storage: Box<dyn StorageKv>) -> Self {
        Self { storage, locked: AtomicBool::new(false) }
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get(&self, out_point: &OutPoint) -> Option<Utxo> {
        let key = keys::utxo(&out_point.storage_key());
        self.storage
            .get(&key)
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    #[must_use]
    pub fn find_by_address(&self, address: &[u8]) -> Vec<Utxo> {
        self.storage
            .prefix_scan(&keys::address_prefix(address))
            .into_iter()
            .filter_map(|(key, _)| self.resolve_index_entry(&key, b"index:address:"))
            .collect()
    }

    #[must_use]
    pub fn find_by_asset(&self, token_key: &[u8]) -> Vec<Utxo> {
        self.storage
            .prefix_scan(&keys::asset_prefix(token_key))
            .into_iter()
            .filter_map(|(key, _)| self.resolve_index_entry(&key, b"index:asset:"))
            .collect()
    }

    fn resolve_index_entry(&self, index_key: &[u8], prefix: &[u8]) -> Option<Utxo> {
        // index key shape: {prefix}{selector}:{out_point_key} - the out_point
        // key is always the trailing 36 bytes (32-byte tx id + 4-byte index).
        if index_key.len() < prefix.len() + 36 {
            return None;
        }
        let out_point_key = &index_key[index_key.len() - 36..];
        let tx_id = Hash256::try_from(&out_point_key[..32]).ok()?;
        let output_index = u32::from_be_bytes(out_point_key[32..36].try_into().ok()?);
        self.get(&OutPoint::new(tx_id, output_index))
    }

    /// Applies one accepted block's UTXO effects atomically: writes from a
    /// single accepted block form one atomic batch.
    ///
    /// # Errors
    /// Returns `NotFound` if a declared spend references a UTXO absent from
    /// the set, `StateConflict` on an attempt to recreate an existing
    /// `OutPoint`, and `StateConflict` if a fork resolution is currently in
    /// progress against this engine.
    pub fn apply_block(
        &self,
        inputs: &[BlockInputEffect],
        outputs: &[BlockOutputEffect],
        block_height: u64,
        timestamp: i64,
    ) -> CoreResult<Vec<UtxoChangeEvent>> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(CoreError::state_conflict(
                "utxo_engine",
                "block application refused while fork processing is in progress",
            ));
        }
        self.apply_block_unchecked(inputs, outputs, block_height, timestamp)
    }

    /// Same effect as `apply_block`, without the fork-processing guard.
    /// Reserved for the fork engine's own reconstruction, which already
    /// holds exclusive access for the duration of its state machine.
    pub(crate) fn apply_block_unchecked(
        &self,
        inputs: &[BlockInputEffect],
        outputs: &[BlockOutputEffect],
        block_height: u64,
        timestamp: i64,
    ) -> CoreResult<Vec<UtxoChangeEvent>> {
        let mut txn = self.storage.begin_transaction();
        let mut events = Vec::new();

        for input in inputs {
            let key = keys::utxo(&input.out_point.storage_key());
            let Some(bytes) = self.storage.get(&key) else {
                return Err(CoreError::not_found(
                    format!("{:?}", input.out_point),
                    "input references a UTXO that does not exist",
                ));
            };
            let mut utxo: Utxo = serde_json::from_slice(&bytes).map_err(|e| {
                CoreError::external(format!("{:?}", input.out_point), e.to_string())
            })?;
            if utxo.status == UtxoStatus::Consumed {
                return Err(CoreError::state_conflict(
                    format!("{:?}", input.out_point),
                    "UTXO already consumed",
                ));
            }

            // Releasing this holder's own references is the reverse
            // transition: unlock happens when the referencing UTXO is spent.
            for target_point in utxo.references.clone() {
                let target_key = keys::utxo(&target_point.storage_key());
                if let Some(target_bytes) = self.storage.get(&target_key) {
                    let mut target: Utxo = serde_json::from_slice(&target_bytes)
                        .map_err(|e| CoreError::external(format!("{target_point:?}"), e.to_string()))?;
                    target.ref_count = target.ref_count.saturating_sub(1);
                    if target.ref_count == 0 && target.status == UtxoStatus::Referenced {
                        target.status = UtxoStatus::Available;
                        events.push(UtxoChangeEvent {
                            utxo_hash: target_point,
                            operation: UtxoOp::Unlocked,
                            tx_hash: input.spending_tx,
                            block_height,
                            timestamp,
                        });
                    }
                    txn.put(target_key, serde_json::to_vec(&target).expect("utxo serializes"));
                }
            }

            utxo.status = UtxoStatus::Consumed;
            events.push(UtxoChangeEvent {
                utxo_hash: utxo.out_point,
                operation: UtxoOp::Spent,
                tx_hash: input.spending_tx,
                block_height,
                timestamp,
            });
            txn.put(key, serde_json::to_vec(&utxo).expect("utxo serializes"));
        }

        for output in outputs {
            // New reference-only dependencies declared by this output
            // transition their targets Available -> Referenced.
            for target_point in &output.references {
                let target_key = keys::utxo(&target_point.storage_key());
                let Some(target_bytes) = self.storage.get(&target_key) else {
                    return Err(CoreError::not_found(
                        format!("{target_point:?}"),
                        "reference declared against a UTXO that does not exist",
                    ));
                };
                let mut target: Utxo = serde_json::from_slice(&target_bytes)
                    .map_err(|e| CoreError::external(format!("{target_point:?}"), e.to_string()))?;
                target.ref_count += 1;
                if target.status == UtxoStatus::Available {
                    target.status = UtxoStatus::Referenced;
                    events.push(UtxoChangeEvent {
                        utxo_hash: *target_point,
                        operation: UtxoOp::Locked,
                        tx_hash: output.out_point.tx_id,
                        block_height,
                        timestamp,
                    });
                }
                txn.put(target_key, serde_json::to_vec(&target).expect("utxo serializes"));
            }

            let utxo = Utxo {
                out_point: output.out_point,
                category: output.category,
                owner_address: output.owner_address.clone(),
                block_height,
                status: UtxoStatus::Available,
                created_timestamp: output.created_timestamp,
                cached_output: output.cached_output.clone(),
                locking_conditions: output.locking_conditions.clone(),
                ref_count: 0,
                references: output.references.clone(),
            };
            let out_key = output.out_point.storage_key();
            txn.put(keys::utxo(&out_key), serde_json::to_vec(&utxo).expect("utxo serializes"));
            txn.put(keys::by_address(&output.owner_address, &out_key), Vec::new());
            if let Some(token_id) = utxo.cached_output.token_id() {
                txn.put(keys::by_asset(&token_id.aggregation_key(), &out_key), Vec::new());
            }
            txn.put(keys::by_height(block_height, &out_key), Vec::new());
            events.push(UtxoChangeEvent {
                utxo_hash: output.out_point,
                operation: UtxoOp::Created,
                tx_hash: output.out_point.tx_id,
                block_height,
                timestamp,
            });
        }

        txn.commit();
        Ok(events)
    }

    /// Inverts one block's created outputs during a fork rollback.
    pub fn delete_created_above(&self, height: u64) {
        let scanned = self.storage.prefix_scan(b"index:height:");
        let mut txn = self.storage.begin_transaction();
        for (key, _) in scanned {
            if let Some(entry_height) = parse_height_index_key(&key) {
                if entry_height > height {
                    if let Some(out_point) = parse_out_point_from_index_key(&key) {
                        txn.delete(keys::utxo(&out_point.storage_key()));
                    }
                    txn.delete(key);
                }
            }
        }
        txn.commit();
    }

    /// Resurrects UTXOs consumed by blocks above the common ancestor to
    /// whatever status they held beforehand.
    pub fn resurrect_above(&self, height: u64, resurrect: &HashSet<OutPoint>) {
        let mut txn = self.storage.begin_transaction();
        for out_point in resurrect {
            let key = keys::utxo(&out_point.storage_key());
            if let Some(bytes) = self.storage.get(&key) {
                if let Ok(mut utxo) = serde_json::from_slice::<Utxo>(&bytes) {
                    if utxo.block_height <= height && utxo.status == UtxoStatus::Consumed {
                        utxo.status = UtxoStatus::Available;
                        txn.put(key, serde_json::to_vec(&utxo).expect("utxo serializes"));
                    }
                }
            }
        }
        txn.commit();
    }

    /// A point-in-time copy of the whole UTXO set, taken by the fork engine
    /// before it starts mutating state.
    #[must_use]
    pub fn checkpoint(&self) -> std::collections::BTreeMap<Vec<u8>, Vec<u8>> {
        self.storage.checkpoint()
    }

    pub fn restore(&self, checkpoint: std::collections::BTreeMap<Vec<u8>, Vec<u8>>) {
        self.storage.restore_from(checkpoint);
    }

    /// Garbage-collects `Consumed` UTXOs past the retention horizon.
    pub fn collect_consumed(&self, retention_horizon: u64, current_height: u64) {
        let all = self.storage.prefix_scan(b"utxo:set:");
        let mut txn = self.storage.begin_transaction();
        for (key, bytes) in all {
            if let Ok(utxo) = serde_json::from_slice::<Utxo>(&bytes) {
                if utxo.status == UtxoStatus::Consumed
                    && utxo.block_height + retention_horizon < current_height
                {
                    txn.delete(key);
                }
            }
        }
        txn.commit();
    }
}

fn parse_height_index_key(key: &[u8]) -> Option<u64> {
    let prefix = b"index:height:";
    if key.len() < prefix.len() + 8 || !key.starts_with(prefix) {
        return None;
    }
    let bytes = &key[prefix.len()..prefix.len() + 8];
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

fn parse_out_point_from_index_key(key: &[u8]) -> Option<OutPoint> {
    if key.len() < 36 {
        return None;
    }
    let tail = &key[key.len() - 36..];
    let tx_id = Hash256::try_from(&tail[..32]).ok()?;
    let output_index = u32::from_be_bytes(tail[32..36].try_into().ok()?);
    Some(OutPoint::new(tx_id, output_index))
}

/// One spent input's effect on the UTXO set, built by the caller (the
/// block-application layer) from a `Transaction`'s inputs. Any references the
/// spent UTXO itself declared are released automatically, derived from its
/// own `references` field rather than flagged here.
#[derive(Debug, Clone)]
pub struct BlockInputEffect {
    pub out_point: OutPoint,
    pub spending_tx: Hash256,
}

/// One created output's effect on the UTXO set. A non-empty `references`
/// list declares reference-only dependencies on other UTXOs, locking them
/// until this output is itself spent.
#[derive(Debug, Clone)]
pub struct BlockOutputEffect {
    pub out_point: OutPoint,
    pub category: Category,
    pub owner_address: Vec<u8>,
    pub cached_output: CachedOutput,
    pub locking_conditions: Vec<LockingCondition>,
    pub created_timestamp: u64,
    pub references: Vec<OutPoint>,
}
