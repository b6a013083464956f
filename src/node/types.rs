use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Context-extension variable carrying the positional claim marker.
///
/// Rent-claim inputs are authorized by this marker plus an empty proof; the
/// ledger's script interpreter recognizes the convention, so no signature is
/// produced for them. The marker names the output index that recreates the
/// input and must never be reordered independently of it.
pub const CLAIM_CONTEXT_VAR: &str = "127";

/// An unspent (or recently spent) ledger entry as reported by the node's
/// blockchain index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBox {
    pub box_id: String,
    /// Value in nanounits. Wire format is u64; all fee arithmetic widens
    /// to u128.
    pub value: u64,
    pub ergo_tree: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
    pub creation_height: u32,
    #[serde(default)]
    pub additional_registers: BTreeMap<String, String>,
    /// Serialized size of the box in bytes, the basis of its rent fee.
    pub size: u64,
    #[serde(default)]
    pub spent_transaction_id: Option<String>,
}

impl ChainBox {
    pub fn is_spent(&self) -> bool {
        self.spent_transaction_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub token_id: String,
    pub amount: u64,
}

/// Input of a not-yet-signed claim transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedInput {
    pub box_id: String,
    /// Context extension. Claim inputs carry the positional marker under
    /// [`CLAIM_CONTEXT_VAR`]; wallet top-up inputs leave this empty.
    #[serde(default)]
    pub extension: BTreeMap<String, String>,
}

impl UnsignedInput {
    pub fn is_claim_input(&self) -> bool {
        self.extension.contains_key(CLAIM_CONTEXT_VAR)
    }
}

/// Output of a claim transaction before it acquires an id on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputCandidate {
    pub value: u64,
    pub ergo_tree: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub additional_registers: BTreeMap<String, String>,
    pub creation_height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedClaimTx {
    pub inputs: Vec<UnsignedInput>,
    #[serde(default)]
    pub data_inputs: Vec<String>,
    pub outputs: Vec<OutputCandidate>,
}

impl UnsignedClaimTx {
    /// Total input value is not derivable from the unsigned form alone
    /// (inputs reference boxes by id), so balance checks happen in the
    /// builder where the resolved boxes are at hand.
    pub fn output_total(&self) -> u128 {
        self.outputs.iter().map(|o| u128::from(o.value)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingProof {
    /// Hex-encoded proof bytes; empty for marker-authorized claim inputs.
    pub proof_bytes: String,
    #[serde(default)]
    pub extension: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInput {
    pub box_id: String,
    pub spending_proof: SpendingProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedClaimTx {
    pub inputs: Vec<SignedInput>,
    #[serde(default)]
    pub data_inputs: Vec<String>,
    pub outputs: Vec<OutputCandidate>,
}
