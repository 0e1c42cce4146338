//! Block data model: a header plus an ordered transaction list, with a
//! Merkle root delegated to an injected capability rather than a
//! hard-coded tree construction.

use crate::transaction::Transaction;
use crate::utxo::{BlockInputEffect, BlockOutputEffect, OutPoint};
use chain_types::{Capabilities, Hash256};
use serde::{Deserialize, Serialize};

/// Difficulty/mining fields are dropped since consensus algorithm selection
/// is out of scope; `nonce` is retained only as an opaque field a consensus
/// layer outside this core may populate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: i64,
    pub chain_id: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Merkle root over each transaction's canonical serialization, using
    /// whatever `MerkleCapability` the caller injects rather than a
    /// hard-coded tree construction.
    #[must_use]
    pub fn calculate_merkle_root(transactions: &[Transaction], caps: &dyn Capabilities) -> Hash256 {
        let leaves: Vec<Hash256> = transactions
            .iter()
            .map(|tx| {
                let bytes = serde_json::to_vec(tx).expect("transaction serializes");
                caps.hash().hash(&bytes)
            })
            .collect();
        caps.merkle().root(&leaves)
    }

    /// Flattens this block's transactions into the effects the UTXO engine
    /// applies as one atomic batch, resolving each transaction id from its
    /// canonical serialization.
    #[must_use]
    pub fn utxo_effects(&self, caps: &dyn Capabilities) -> (Vec<BlockInputEffect>, Vec<BlockOutputEffect>) {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for tx in &self.transactions {
            let tx_bytes = serde_json::to_vec(tx).expect("transaction serializes");
            let tx_id = caps.hash().hash(&tx_bytes);

            let mut references = Vec::new();
            for input in &tx.inputs {
                if input.reference_only {
                    references.push(input.previous_output);
                } else {
                    inputs.push(BlockInputEffect {
                        out_point: input.previous_output,
                        spending_tx: tx_id,
                    });
                }
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                outputs.push(BlockOutputEffect {
                    out_point: OutPoint::new(tx_id, index as u32),
                    category: output.category,
                    owner_address: output.owner_address.clone(),
                    cached_output: output.cached_output.clone(),
                    locking_conditions: output.locking_conditions.clone(),
                    created_timestamp: self.header.timestamp.max(0) as u64,
                    references: if index == 0 { references.clone() } else { vec![] },
                });
            }
        }
        (inputs, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_types::DefaultCapabilities;

    #[test]
    fn merkle_root_of_no_transactions_is_zero() {
        let caps = DefaultCapabilities;
        assert_eq!(Block::calculate_merkle_root(&[], &caps), Hash256::zero());
    }

    #[test]
    fn merkle_root_changes_with_transaction_set() {
        let caps = DefaultCapabilities;
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
        };
        let root_empty = Block::calculate_merkle_root(&[], &caps);
        let root_one = Block::calculate_merkle_root(std::slice::from_ref(&tx), &caps);
        assert_ne!(root_empty, root_one);
    }

    #[test]
    fn utxo_effects_separates_spends_from_references() {
        let caps = DefaultCapabilities;
        let previous = OutPoint::new(Hash256::keccak256(b"prev"), 0);
        let tx = Transaction {
            version: 1,
            inputs: vec![crate::transaction::TxInput {
                previous_output: previous,
                reference_only: true,
                unlock_proof: vec![],
                sequence: 0,
            }],
            outputs: vec![],
            lock_time: 0,
        };
        let block = Block {
            header: BlockHeader {
                height: 1,
                previous_hash: Hash256::zero(),
                merkle_root: Hash256::zero(),
                timestamp: 0,
                chain_id: 1,
                nonce: 0,
            },
            transactions: vec![tx],
        };
        let (inputs, _outputs) = block.utxo_effects(&caps);
        assert!(inputs.is_empty());
    }
}
