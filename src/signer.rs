use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::{HarvestError, Result};
use crate::node::types::{SignedClaimTx, SignedInput, SpendingProof, UnsignedClaimTx};

/// Turns an unsigned claim transaction into a broadcastable one.
///
/// Key material never enters this crate; either no signature is needed at
/// all (pure claim inputs) or the node wallet produces it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, tx: &UnsignedClaimTx) -> Result<SignedClaimTx>;
}

/// Prover for signatureless claim transactions.
///
/// A claim input is authorized by an empty proof plus the positional marker
/// already present in its context extension, so "signing" is a pure
/// restructuring. Any input without a marker would need a real signature,
/// which this prover refuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextClaimProver;

#[async_trait]
impl Signer for ContextClaimProver {
    async fn sign(&self, tx: &UnsignedClaimTx) -> Result<SignedClaimTx> {
        let mut inputs = Vec::with_capacity(tx.inputs.len());

        for input in &tx.inputs {
            if !input.is_claim_input() {
                return Err(HarvestError::Signer(format!(
                    "input {} carries no claim marker and needs a wallet signature; \
                     use the node wallet signer",
                    input.box_id
                )));
            }
            inputs.push(SignedInput {
                box_id: input.box_id.clone(),
                spending_proof: SpendingProof {
                    proof_bytes: String::new(),
                    extension: input.extension.clone(),
                },
            });
        }

        Ok(SignedClaimTx {
            inputs,
            data_inputs: tx.data_inputs.clone(),
            outputs: tx.outputs.clone(),
        })
    }
}

/// Signer backed by the node's wallet API. Required whenever wallet boxes
/// are pulled in to cover a fee shortfall, since those inputs need real
/// signatures.
pub struct NodeWalletSigner {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NodeWalletSigner {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Signer for NodeWalletSigner {
    async fn sign(&self, tx: &UnsignedClaimTx) -> Result<SignedClaimTx> {
        let resp = self
            .client
            .post(format!("{}/wallet/transaction/sign", self.base_url))
            .header("api_key", &self.api_key)
            .json(&serde_json::json!({ "tx": tx }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(HarvestError::Signer(detail));
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::types::{OutputCandidate, UnsignedInput, CLAIM_CONTEXT_VAR};
    use std::collections::BTreeMap;

    fn claim_input(id: &str, marker: &str) -> UnsignedInput {
        let mut extension = BTreeMap::new();
        extension.insert(CLAIM_CONTEXT_VAR.to_string(), marker.to_string());
        UnsignedInput {
            box_id: id.to_string(),
            extension,
        }
    }

    fn output(value: u64) -> OutputCandidate {
        OutputCandidate {
            value,
            ergo_tree: "0008cd02deadbeef".to_string(),
            assets: vec![],
            additional_registers: Default::default(),
            creation_height: 1600,
        }
    }

    #[tokio::test]
    async fn test_context_prover_keeps_markers_and_order() {
        let tx = UnsignedClaimTx {
            inputs: vec![claim_input("a", "0000"), claim_input("b", "0001")],
            data_inputs: vec![],
            outputs: vec![output(1), output(2)],
        };

        let signed = ContextClaimProver.sign(&tx).await.unwrap();

        assert_eq!(signed.inputs.len(), 2);
        assert_eq!(signed.inputs[0].box_id, "a");
        assert_eq!(signed.inputs[1].box_id, "b");
        for input in &signed.inputs {
            assert!(input.spending_proof.proof_bytes.is_empty());
        }
        assert_eq!(
            signed.inputs[1].spending_proof.extension[CLAIM_CONTEXT_VAR],
            "0001"
        );
    }

    #[tokio::test]
    async fn test_context_prover_rejects_wallet_inputs() {
        let tx = UnsignedClaimTx {
            inputs: vec![
                claim_input("a", "0000"),
                UnsignedInput {
                    box_id: "wallet-box".to_string(),
                    extension: BTreeMap::new(),
                },
            ],
            data_inputs: vec![],
            outputs: vec![output(1)],
        };

        let err = ContextClaimProver.sign(&tx).await.unwrap_err();
        assert!(matches!(err, HarvestError::Signer(_)));
    }
}
