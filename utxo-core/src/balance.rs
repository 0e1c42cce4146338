//! Account/balance aggregation over the UTXO set, generalized from a
//! single native-coin `get_balance` into the full query surface: platform
//! balance, per-token balance, locked balance, pending balance and the
//! effective (confirmed + pending) view.

use crate::transaction::Transaction;
use crate::utxo::{TokenId, UtxoEngine, UtxoStatus};
use chain_types::{Amount, Capabilities, Hash256};

/// Read-only view over the mempool a `BalanceView` is allowed: the pending
/// transaction list, nothing else. Submission is out of scope here.
pub trait MempoolView: Send + Sync {
    fn get_all_pending(&self) -> Vec<Transaction>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWarning {
    pub out_point_debug: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedEntry {
    pub amount: Amount,
    pub unlock_height: Option<u64>,
    pub unlock_timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub tx_id: Hash256,
    pub delta: i128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveBalance {
    pub confirmed: Amount,
    pub pending_delta: i128,
}

pub struct BalanceView<'a> {
    utxo: &'a UtxoEngine,
    mempool: &'a dyn MempoolView,
    caps: &'a dyn Capabilities,
}

impl<'a> BalanceView<'a> {
    #[must_use]
    pub fn new(utxo: &'a UtxoEngine, mempool: &'a dyn MempoolView, caps: &'a dyn Capabilities) -> Self {
        Self { utxo, mempool, caps }
    }

    /// Sum of `Available` native-coin UTXOs owned by `address`. Parse
    /// failures downgrade to a recorded warning instead of a hard error.
    #[must_use]
    pub fn get_platform_balance(&self, address: &[u8]) -> (Amount, Vec<BalanceWarning>) {
        self.aggregate(address, None)
    }

    #[must_use]
    pub fn get_token_balance(&self, address: &[u8], token_id: &TokenId) -> (Amount, Vec<BalanceWarning>) {
        self.aggregate(address, Some(token_id))
    }

    /// Groups every `ContractToken` this address holds by aggregation key.
    #[must_use]
    pub fn get_all_token_balances(&self, address: &[u8]) -> (Vec<(Vec<u8>, Amount)>, Vec<BalanceWarning>) {
        let mut totals: std::collections::BTreeMap<Vec<u8>, Amount> = std::collections::BTreeMap::new();
        let mut warnings = Vec::new();
        for utxo in self.utxo.find_by_address(address) {
            if utxo.status == UtxoStatus::Consumed {
                continue;
            }
            if let Some(token_id) = utxo.cached_output.token_id() {
                *totals.entry(token_id.aggregation_key()).or_insert(0) += utxo.cached_output.amount();
            }
            if matches!(utxo.cached_output, crate::utxo::CachedOutput::Missing) {
                warnings.push(BalanceWarning {
                    out_point_debug: format!("{:?}", utxo.out_point),
                    reason: "output content failed to deserialize".to_string(),
                });
            }
        }
        (totals.into_iter().collect(), warnings)
    }

    /// UTXOs whose locking conditions are still active, or whose status is
    /// `Referenced` — surfaced once here, not duplicated in a separate
    /// referenced-only bucket.
    #[must_use]
    pub fn get_locked_balances(&self, address: &[u8], current_height: u64, current_timestamp: u64) -> Vec<LockedEntry> {
        let mut entries = Vec::new();
        for utxo in self.utxo.find_by_address(address) {
            if utxo.status == UtxoStatus::Consumed {
                continue;
            }
            let structurally_locked = utxo
                .locking_conditions
                .iter()
                .any(|cond| cond.is_active(current_height, current_timestamp));
            if structurally_locked || utxo.status == UtxoStatus::Referenced {
                entries.push(LockedEntry {
                    amount: utxo.cached_output.amount(),
                    unlock_height: utxo.locking_conditions.iter().find_map(|c| match c {
                        crate::utxo::LockingCondition::HeightLock { unlock_height } => Some(*unlock_height),
                        _ => None,
                    }),
                    unlock_timestamp: utxo.locking_conditions.iter().find_map(|c| match c {
                        crate::utxo::LockingCondition::TimeLock { unlock_timestamp } => Some(*unlock_timestamp),
                        _ => None,
                    }),
                });
            }
        }
        entries
    }

    /// Per-pending-transaction delta this address would see if every
    /// mempool transaction confirmed, using each transaction's own
    /// `delta` formula.
    #[must_use]
    pub fn get_pending_balances(&self, address: &[u8], token_id: Option<&TokenId>) -> Vec<PendingEntry> {
        self.mempool
            .get_all_pending()
            .into_iter()
            .map(|tx| {
                let owned_inputs = self.resolve_owned_inputs(&tx, address);
                let delta = tx.delta(address, token_id, &owned_inputs);
                let tx_bytes = serde_json::to_vec(&tx).expect("transaction serializes");
                PendingEntry {
                    tx_id: self.caps.hash().hash(&tx_bytes),
                    delta,
                }
            })
            .filter(|entry| entry.delta != 0)
            .collect()
    }

    #[must_use]
    pub fn get_effective_balance(&self, address: &[u8], token_id: Option<&TokenId>) -> EffectiveBalance {
        let (confirmed, _warnings) = self.aggregate(address, token_id);
        let pending_delta: i128 = self
            .get_pending_balances(address, token_id)
            .iter()
            .map(|entry| entry.delta)
            .sum();
        EffectiveBalance { confirmed, pending_delta }
    }

    fn aggregate(&self, address: &[u8], token_id: Option<&TokenId>) -> (Amount, Vec<BalanceWarning>) {
        let mut total: Amount = 0;
        let mut warnings = Vec::new();
        for utxo in self.utxo.find_by_address(address) {
            if utxo.status == UtxoStatus::Consumed {
                continue;
            }
            if matches!(utxo.cached_output, crate::utxo::CachedOutput::Missing) {
                warnings.push(BalanceWarning {
                    out_point_debug: format!("{:?}", utxo.out_point),
                    reason: "output content failed to deserialize".to_string(),
                });
                continue;
            }
            let matches = match (utxo.cached_output.token_id(), token_id) {
                (Some(a), Some(b)) => a == b,
                (None, None) => matches!(utxo.cached_output, crate::utxo::CachedOutput::NativeCoin { .. }),
                _ => false,
            };
            if matches {
                total += utxo.cached_output.amount();
            }
        }
        (total, warnings)
    }

    fn resolve_owned_inputs(
        &self,
        tx: &Transaction,
        address: &[u8],
    ) -> Vec<(crate::transaction::TxInput, Vec<u8>, crate::utxo::CachedOutput)> {
        tx.inputs
            .iter()
            .filter_map(|input| {
                let utxo = self.utxo.get(&input.previous_output)?;
                if utxo.owner_address == address {
                    Some((input.clone(), utxo.owner_address, utxo.cached_output))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use crate::utxo::{BlockOutputEffect, Category, OutPoint};
    use chain_types::Hash256;

    struct EmptyMempool;
    impl MempoolView for EmptyMempool {
        fn get_all_pending(&self) -> Vec<Transaction> {
            vec![]
        }
    }

    fn coin_output(tx_id: Hash256, index: u32, owner: &[u8], amount: Amount) -> BlockOutputEffect {
        BlockOutputEffect {
            out_point: OutPoint::new(tx_id, index),
            category: Category::Asset,
            owner_address: owner.to_vec(),
            cached_output: crate::utxo::CachedOutput::NativeCoin { amount },
            locking_conditions: vec![],
            created_timestamp: 0,
            references: vec![],
        }
    }

    #[test]
    fn platform_balance_sums_available_native_coin_utxos() {
        let engine = UtxoEngine::new(Box::new(MemStore::new()));
        let tx_id = Hash256::keccak256(b"tx1");
        engine
            .apply_block(&[], &[coin_output(tx_id, 0, b"alice", 1_000), coin_output(tx_id, 1, b"alice", 500)], 0, 0)
            .unwrap();

        let mempool = EmptyMempool;
        let caps = chain_types::DefaultCapabilities;
        let view = BalanceView::new(&engine, &mempool, &caps);
        let (balance, warnings) = view.get_platform_balance(b"alice");
        assert_eq!(balance, 1_500);
        assert!(warnings.is_empty());
    }

    #[test]
    fn consumed_utxos_are_excluded_from_balance() {
        let engine = UtxoEngine::new(Box::new(MemStore::new()));
        let tx_id = Hash256::keccak256(b"tx1");
        engine.apply_block(&[], &[coin_output(tx_id, 0, b"alice", 1_000)], 0, 0).unwrap();
        engine
            .apply_block(
                &[crate::utxo::BlockInputEffect { out_point: OutPoint::new(tx_id, 0), spending_tx: Hash256::keccak256(b"spend") }],
                &[],
                1,
                0,
            )
            .unwrap();

        let mempool = EmptyMempool;
        let caps = chain_types::DefaultCapabilities;
        let view = BalanceView::new(&engine, &mempool, &caps);
        let (balance, _) = view.get_platform_balance(b"alice");
        assert_eq!(balance, 0);
    }

    #[test]
    fn locked_balance_surfaces_referenced_utxos_once() {
        let engine = UtxoEngine::new(Box::new(MemStore::new()));
        let tx_id = Hash256::keccak256(b"tx1");
        engine.apply_block(&[], &[coin_output(tx_id, 0, b"alice", 10)], 0, 0).unwrap();
        let target = OutPoint::new(tx_id, 0);

        let holder_tx = Hash256::keccak256(b"holder");
        let holder_output = BlockOutputEffect {
            out_point: OutPoint::new(holder_tx, 0),
            category: Category::State,
            owner_address: b"bob".to_vec(),
            cached_output: crate::utxo::CachedOutput::State { cell: vec![] },
            locking_conditions: vec![],
            created_timestamp: 0,
            references: vec![target],
        };
        engine.apply_block(&[], &[holder_output], 1, 0).unwrap();

        let mempool = EmptyMempool;
        let caps = chain_types::DefaultCapabilities;
        let view = BalanceView::new(&engine, &mempool, &caps);
        let locked = view.get_locked_balances(b"alice", 0, 0);
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].amount, 10);
    }
}
