use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::FeePolicy;
use crate::error::{HarvestError, Result};
use crate::node::client::LedgerNode;
use crate::node::types::{
    ChainBox, OutputCandidate, UnsignedClaimTx, UnsignedInput, CLAIM_CONTEXT_VAR,
};
use crate::rent::RentSchedule;

/// A bounded group of boxes claimed together in one transaction, with the
/// balanced unsigned transaction that claims them.
#[derive(Debug, Clone)]
pub struct ClaimBatch {
    pub boxes: Vec<ChainBox>,
    pub unsigned_tx: UnsignedClaimTx,
    pub total_rent_collected: u128,
    pub fee_paid: u128,
}

/// Split claimable boxes into batches of at most `max_batch_size`,
/// preserving order end-to-end. Ordering matters: each input's claim marker
/// is positional.
pub fn partition(boxes: Vec<ChainBox>, max_batch_size: usize) -> Vec<Vec<ChainBox>> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(max_batch_size.min(boxes.len()));

    for b in boxes {
        current.push(b);
        if current.len() == max_batch_size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Positional claim marker for input `index`: the index of the output that
/// recreates it, hex-encoded. Attached once at build time and carried
/// verbatim through signing.
fn claim_marker(index: usize) -> String {
    format!("{:04x}", index)
}

pub struct BatchBuilder<'a, N: LedgerNode> {
    node: &'a N,
    schedule: RentSchedule,
    policy: FeePolicy,
    network_fee: u64,
    change_address: String,
    change_tree: String,
}

impl<'a, N: LedgerNode> BatchBuilder<'a, N> {
    pub fn new(
        node: &'a N,
        schedule: RentSchedule,
        policy: FeePolicy,
        network_fee: u64,
        change_address: String,
        change_tree: String,
    ) -> Self {
        Self {
            node,
            schedule,
            policy,
            network_fee,
            change_address,
            change_tree,
        }
    }

    /// Build one balanced claim transaction for a batch of boxes.
    ///
    /// Every box is re-fetched first; one that vanished (spent since its
    /// eligibility check) fails the build with `BoxNotFound` so the caller
    /// can exclude it and rebuild — a spent input is never silently kept.
    ///
    /// The balance invariant `Σ inputs = Σ outputs + fee` is checked before
    /// the batch is released; a violation aborts before anything reaches
    /// the signer.
    pub async fn build(&self, boxes: Vec<ChainBox>, current_height: u32) -> Result<ClaimBatch> {
        if boxes.is_empty() {
            return Err(HarvestError::InvariantViolation(
                "refusing to build an empty batch".to_string(),
            ));
        }

        // Re-validate against the chain: value and size cannot have changed,
        // but the box may be gone.
        let mut fresh_boxes = Vec::with_capacity(boxes.len());
        for b in &boxes {
            match self.node.box_by_id(&b.box_id).await? {
                Some(fresh) if !fresh.is_spent() => fresh_boxes.push(fresh),
                _ => return Err(HarvestError::BoxNotFound(b.box_id.clone())),
            }
        }

        let mut inputs = Vec::with_capacity(fresh_boxes.len() + 1);
        let mut outputs = Vec::with_capacity(fresh_boxes.len() + 1);
        let mut input_total: u128 = 0;
        let mut total_rent: u128 = 0;

        for (index, b) in fresh_boxes.iter().enumerate() {
            let rent = self.schedule.box_rent_fee(b);
            let remaining = u128::from(b.value).checked_sub(rent).ok_or_else(|| {
                HarvestError::InvariantViolation(format!(
                    "box {} reached batching with value below its rent",
                    b.box_id
                ))
            })?;

            let mut extension = BTreeMap::new();
            extension.insert(CLAIM_CONTEXT_VAR.to_string(), claim_marker(index));
            inputs.push(UnsignedInput {
                box_id: b.box_id.clone(),
                extension,
            });

            // The recreated box: same script, assets and registers, value
            // shrunk by the rent, age clock restarted.
            outputs.push(OutputCandidate {
                value: u64::try_from(remaining).map_err(|_| {
                    HarvestError::InvariantViolation(format!(
                        "recreated value for box {} exceeds the wire range",
                        b.box_id
                    ))
                })?,
                ergo_tree: b.ergo_tree.clone(),
                assets: b.assets.clone(),
                additional_registers: b.additional_registers.clone(),
                creation_height: current_height,
            });

            input_total += u128::from(b.value);
            total_rent += rent;
        }

        let fee = u128::from(self.network_fee);
        let change = self
            .resolve_fee(&mut inputs, &mut input_total, total_rent, fee)
            .await?;

        if change > 0 {
            outputs.push(OutputCandidate {
                value: u64::try_from(change).map_err(|_| {
                    HarvestError::InvariantViolation("change exceeds the wire range".to_string())
                })?,
                ergo_tree: self.change_tree.clone(),
                assets: vec![],
                additional_registers: BTreeMap::new(),
                creation_height: current_height,
            });
        }

        let unsigned_tx = UnsignedClaimTx {
            inputs,
            data_inputs: vec![],
            outputs,
        };

        let output_total = unsigned_tx.output_total();
        if input_total != output_total + fee {
            return Err(HarvestError::InvariantViolation(format!(
                "inputs {} != outputs {} + fee {}",
                input_total, output_total, fee
            )));
        }

        info!(
            "Built claim batch: {} box(es), rent {}, fee {}",
            fresh_boxes.len(),
            total_rent,
            fee
        );

        Ok(ClaimBatch {
            boxes: fresh_boxes,
            unsigned_tx,
            total_rent_collected: total_rent,
            fee_paid: fee,
        })
    }

    /// Apply the configured fee-sourcing policy. May append wallet inputs.
    /// Returns the change credited to the operator.
    async fn resolve_fee(
        &self,
        inputs: &mut Vec<UnsignedInput>,
        input_total: &mut u128,
        total_rent: u128,
        fee: u128,
    ) -> Result<u128> {
        if total_rent > fee {
            // Rent covers the fee under either policy; surplus goes to the
            // operator, never donated.
            return Ok(total_rent - fee);
        }

        match self.policy {
            FeePolicy::RentFundsFee => Err(HarvestError::InsufficientRent {
                collected: total_rent,
                fee,
            }),
            FeePolicy::WalletUtxos => {
                let mut candidates = self.node.spendable_boxes(&self.change_address).await?;
                // Deterministic selection: largest value first, id as
                // tie-break. Boxes carrying assets are left alone so no
                // token ever rides into a claim by accident.
                candidates.retain(|c| {
                    c.assets.is_empty() && !inputs.iter().any(|i| i.box_id == c.box_id)
                });
                candidates.sort_by(|a, b| {
                    b.value.cmp(&a.value).then_with(|| a.box_id.cmp(&b.box_id))
                });

                let mut covered = total_rent;
                for c in candidates {
                    if covered >= fee {
                        break;
                    }
                    debug!("Pulling wallet box {} ({} nano) for fee top-up", c.box_id, c.value);
                    covered += u128::from(c.value);
                    *input_total += u128::from(c.value);
                    inputs.push(UnsignedInput {
                        box_id: c.box_id,
                        extension: BTreeMap::new(),
                    });
                }

                if covered < fee {
                    return Err(HarvestError::InsufficientFunds {
                        shortfall: fee - covered,
                    });
                }

                Ok(covered - fee)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MockLedgerNode;

    const CHANGE_TREE: &str = "0008cd03c0ffee";

    fn chain_box(id: &str, size: u64, value: u64) -> ChainBox {
        ChainBox {
            box_id: id.to_string(),
            value,
            ergo_tree: format!("0008cd02{}", id),
            assets: vec![],
            creation_height: 1000,
            additional_registers: Default::default(),
            size,
            spent_transaction_id: None,
        }
    }

    fn refetching_node(boxes: Vec<ChainBox>) -> MockLedgerNode {
        let mut node = MockLedgerNode::new();
        node.expect_box_by_id().returning(move |id| {
            Ok(boxes.iter().find(|b| b.box_id == id).cloned())
        });
        node
    }

    fn builder<'a>(
        node: &'a MockLedgerNode,
        policy: FeePolicy,
        fee_per_byte: u64,
        network_fee: u64,
    ) -> BatchBuilder<'a, MockLedgerNode> {
        BatchBuilder::new(
            node,
            RentSchedule::new(fee_per_byte, 360, 500),
            policy,
            network_fee,
            "operator-address".to_string(),
            CHANGE_TREE.to_string(),
        )
    }

    #[test]
    fn test_partition_preserves_order_and_bounds() {
        let boxes: Vec<ChainBox> = (0..7)
            .map(|i| chain_box(&format!("b{}", i), 100, 500_000_000))
            .collect();

        let batches = partition(boxes, 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(batches[0][0].box_id, "b0");
        assert_eq!(batches[2][0].box_id, "b6");
    }

    #[tokio::test]
    async fn test_rent_funds_fee_change_output() {
        // rents 100_000_000 and 50_000_000, fee 1_000_000
        let boxes = vec![
            chain_box("a", 100, 400_000_000),
            chain_box("b", 50, 300_000_000),
        ];
        let node = refetching_node(boxes.clone());
        let builder = builder(&node, FeePolicy::RentFundsFee, 1_000_000, 1_000_000);

        let batch = builder.build(boxes, 1600).await.unwrap();

        assert_eq!(batch.total_rent_collected, 150_000_000);
        assert_eq!(batch.fee_paid, 1_000_000);

        let tx = &batch.unsigned_tx;
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[0].value, 300_000_000); // 400M - 100M
        assert_eq!(tx.outputs[1].value, 250_000_000); // 300M - 50M
        assert_eq!(tx.outputs[2].value, 149_000_000); // rent - fee
        assert_eq!(tx.outputs[2].ergo_tree, CHANGE_TREE);

        // balance: Σ in = Σ out + fee
        let input_total: u128 = batch.boxes.iter().map(|b| u128::from(b.value)).sum();
        assert_eq!(input_total, tx.output_total() + batch.fee_paid);
    }

    #[tokio::test]
    async fn test_recreated_outputs_keep_script_assets_registers() {
        let mut b = chain_box("a", 100, 400_000_000);
        b.assets.push(crate::node::types::Asset {
            token_id: "tok".to_string(),
            amount: 5,
        });
        b.additional_registers
            .insert("R4".to_string(), "0e0474657374".to_string());

        let node = refetching_node(vec![b.clone()]);
        let builder = builder(&node, FeePolicy::RentFundsFee, 1_000_000, 1_000_000);

        let batch = builder.build(vec![b.clone()], 1600).await.unwrap();
        let out = &batch.unsigned_tx.outputs[0];
        assert_eq!(out.ergo_tree, b.ergo_tree);
        assert_eq!(out.assets, b.assets);
        assert_eq!(out.additional_registers, b.additional_registers);
        assert_eq!(out.creation_height, 1600); // age clock restarts
    }

    #[tokio::test]
    async fn test_claim_markers_are_positional() {
        let boxes = vec![
            chain_box("a", 100, 400_000_000),
            chain_box("b", 100, 400_000_000),
            chain_box("c", 100, 400_000_000),
        ];
        let node = refetching_node(boxes.clone());
        let builder = builder(&node, FeePolicy::RentFundsFee, 1_000_000, 1_000_000);

        let batch = builder.build(boxes, 1600).await.unwrap();
        for (i, input) in batch.unsigned_tx.inputs.iter().enumerate() {
            assert_eq!(input.extension[CLAIM_CONTEXT_VAR], format!("{:04x}", i));
        }
        // input order mirrors the claimable order it was given
        assert_eq!(batch.unsigned_tx.inputs[0].box_id, "a");
        assert_eq!(batch.unsigned_tx.inputs[2].box_id, "c");
    }

    #[tokio::test]
    async fn test_insufficient_rent() {
        // rents 400_000 each; 800_000 <= 1_000_000 fee
        let boxes = vec![
            chain_box("a", 100, 400_000_000),
            chain_box("b", 100, 400_000_000),
        ];
        let node = refetching_node(boxes.clone());
        let builder = builder(&node, FeePolicy::RentFundsFee, 4_000, 1_000_000);

        let err = builder.build(boxes, 1600).await.unwrap_err();
        match err {
            HarvestError::InsufficientRent { collected, fee } => {
                assert_eq!(collected, 800_000);
                assert_eq!(fee, 1_000_000);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_wallet_utxos_cover_shortfall() {
        let boxes = vec![
            chain_box("a", 100, 400_000_000),
            chain_box("b", 100, 400_000_000),
        ];
        let mut node = refetching_node(boxes.clone());
        node.expect_spendable_boxes().returning(|_| {
            Ok(vec![
                chain_box("w-small", 10, 120_000),
                chain_box("w-big", 10, 150_000),
            ])
        });

        // rent 800_000, fee 1_000_000, shortfall 200_000
        let builder = builder(&node, FeePolicy::WalletUtxos, 4_000, 1_000_000);
        let batch = builder.build(boxes, 1600).await.unwrap();

        let tx = &batch.unsigned_tx;
        // largest wallet box first, both needed
        assert_eq!(tx.inputs[2].box_id, "w-big");
        assert_eq!(tx.inputs[3].box_id, "w-small");
        assert!(tx.inputs[2].extension.is_empty()); // wallet inputs carry no marker

        // change = 800_000 + 270_000 - 1_000_000
        assert_eq!(tx.outputs.last().unwrap().value, 70_000);

        let input_total: u128 =
            u128::from(400_000_000u64) * 2 + 120_000 + 150_000;
        assert_eq!(input_total, tx.output_total() + batch.fee_paid);
    }

    #[tokio::test]
    async fn test_wallet_utxos_exhausted() {
        let boxes = vec![chain_box("a", 100, 400_000_000)];
        let mut node = refetching_node(boxes.clone());
        node.expect_spendable_boxes()
            .returning(|_| Ok(vec![chain_box("w", 10, 50_000)]));

        // rent 400_000, fee 1_000_000, wallet holds only 50_000
        let builder = builder(&node, FeePolicy::WalletUtxos, 4_000, 1_000_000);
        let err = builder.build(boxes, 1600).await.unwrap_err();
        match err {
            HarvestError::InsufficientFunds { shortfall } => {
                assert_eq!(shortfall, 550_000);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_spent_box_fails_build() {
        let live = chain_box("live", 100, 400_000_000);
        let gone = chain_box("gone", 100, 400_000_000);

        let mut node = MockLedgerNode::new();
        node.expect_box_by_id().returning(move |id| {
            Ok(match id {
                "live" => Some(chain_box("live", 100, 400_000_000)),
                _ => None,
            })
        });

        let builder = builder(&node, FeePolicy::RentFundsFee, 1_000_000, 1_000_000);
        let err = builder.build(vec![live, gone], 1600).await.unwrap_err();
        assert!(matches!(err, HarvestError::BoxNotFound(id) if id == "gone"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_refused() {
        let node = MockLedgerNode::new();
        let builder = builder(&node, FeePolicy::RentFundsFee, 1_000_000, 1_000_000);
        let err = builder.build(vec![], 1600).await.unwrap_err();
        assert!(matches!(err, HarvestError::InvariantViolation(_)));
    }
}
