//! Transaction data model: a canonical input/output shape shared by the
//! UTXO engine, block validation and balance aggregation.

use crate::utxo::{CachedOutput, Category, LockingCondition, OutPoint, TokenId};
use chain_types::Amount;
use serde::{Deserialize, Serialize};

/// One spend or reference declared against a prior output. `unlock_proof`
/// generalizes a `script_sig` field: locking conditions are evaluated
/// structurally by the UTXO engine rather than executed, so this core
/// treats the proof bytes as opaque and leaves interpretation to a
/// collaborator outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub reference_only: bool,
    pub unlock_proof: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub category: Category,
    pub owner_address: Vec<u8>,
    pub cached_output: CachedOutput,
    pub locking_conditions: Vec<LockingCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Net effect this transaction has on `address`'s holdings of
    /// `token_id` if it lands in a block: outputs paying the address add,
    /// inputs it owns that get consumed subtract. Declared-reference-only
    /// inputs never subtract — they don't move value.
    ///
    /// `owned_inputs` supplies the `CachedOutput`/`owner_address` pair each
    /// input refers to, since a bare `Transaction` doesn't carry the UTXO
    /// set; callers resolve that from a `UtxoEngine` before calling this.
    #[must_use]
    pub fn delta(
        &self,
        address: &[u8],
        token_id: Option<&TokenId>,
        owned_inputs: &[(TxInput, Vec<u8>, CachedOutput)],
    ) -> i128 {
        let mut delta: i128 = 0;
        for output in &self.outputs {
            if output.owner_address == address && matches_token(&output.cached_output, token_id) {
                delta += output.cached_output.amount() as i128;
            }
        }
        for (input, owner, cached) in owned_inputs {
            if input.reference_only {
                continue;
            }
            if owner.as_slice() == address && matches_token(cached, token_id) {
                delta -= cached.amount() as i128;
            }
        }
        delta
    }
}

fn matches_token(output: &CachedOutput, token_id: Option<&TokenId>) -> bool {
    match (output.token_id(), token_id) {
        (Some(a), Some(b)) => a == b,
        (None, None) => matches!(output, CachedOutput::NativeCoin { .. }),
        _ => false,
    }
}

#[must_use]
pub fn tx_amount_for(output: &TxOutput) -> Amount {
    output.cached_output.amount()
}
