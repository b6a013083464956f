use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::node::types::{ChainBox, SignedClaimTx};
use crate::utils::RateLimiter;

/// Everything the bot needs from the remote ledger node.
///
/// The node is trusted for validity and finality; this trait only moves data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerNode: Send + Sync {
    /// Current full height of the chain.
    async fn current_height(&self) -> Result<u32>;

    /// Fetch a box by id from the blockchain index. `None` means the index
    /// does not know the id (never existed, or pruned).
    async fn box_by_id(&self, box_id: &str) -> Result<Option<ChainBox>>;

    /// A page of the global box-id index, ordered oldest-first. Offsets
    /// already issued stay stable as the chain grows, which is what makes
    /// cursor-chained scans duplicate-free.
    async fn box_id_range(&self, offset: u64, limit: usize) -> Result<Vec<String>>;

    /// Broadcast a signed transaction; returns its id.
    async fn broadcast(&self, tx: &SignedClaimTx) -> Result<String>;

    /// Confirmation count for a transaction, `None` while the node does not
    /// know it (not in mempool, not in a block).
    async fn tx_confirmations(&self, tx_id: &str) -> Result<Option<u32>>;

    /// Unspent boxes guarded by the given address, for fee top-ups.
    async fn spendable_boxes(&self, address: &str) -> Result<Vec<ChainBox>>;

    /// Serialized guarding script for an address.
    async fn address_to_tree(&self, address: &str) -> Result<String>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    full_height: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxInfo {
    num_confirmations: u32,
}

#[derive(Deserialize)]
struct AddressTree {
    tree: String,
}

/// HTTP implementation of [`LedgerNode`] against an indexed node's REST API.
#[derive(Clone)]
pub struct NodeHttpClient {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl NodeHttpClient {
    pub fn new(base_url: &str, timeout_secs: u64, rate_limit_delay_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_delay_ms)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl LedgerNode for NodeHttpClient {
    async fn current_height(&self) -> Result<u32> {
        self.rate_limiter.wait().await;
        let info: NodeInfo = self
            .client
            .get(self.url("/info"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.full_height)
    }

    async fn box_by_id(&self, box_id: &str) -> Result<Option<ChainBox>> {
        self.rate_limiter.wait().await;
        let resp = self
            .client
            .get(self.url(&format!("/blockchain/box/byId/{}", box_id)))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(resp.error_for_status()?.json().await?))
    }

    async fn box_id_range(&self, offset: u64, limit: usize) -> Result<Vec<String>> {
        self.rate_limiter.wait().await;
        let resp = self
            .client
            .get(self.url(&format!(
                "/blockchain/box/range?offset={}&limit={}",
                offset, limit
            )))
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }

    async fn broadcast(&self, tx: &SignedClaimTx) -> Result<String> {
        self.rate_limiter.wait().await;
        let resp = self
            .client
            .post(self.url("/transactions"))
            .json(tx)
            .send()
            .await?;

        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(HarvestError::Rejected(detail));
        }

        Ok(resp.json().await?)
    }

    async fn tx_confirmations(&self, tx_id: &str) -> Result<Option<u32>> {
        self.rate_limiter.wait().await;
        let resp = self
            .client
            .get(self.url(&format!("/blockchain/transaction/byId/{}", tx_id)))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let info: TxInfo = resp.error_for_status()?.json().await?;
        Ok(Some(info.num_confirmations))
    }

    async fn spendable_boxes(&self, address: &str) -> Result<Vec<ChainBox>> {
        self.rate_limiter.wait().await;
        let resp = self
            .client
            .get(self.url(&format!("/blockchain/box/unspent/byAddress/{}", address)))
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }

    async fn address_to_tree(&self, address: &str) -> Result<String> {
        self.rate_limiter.wait().await;
        let resp: AddressTree = self
            .client
            .get(self.url(&format!("/script/addressToTree/{}", address)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.tree)
    }
}
