use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::types::ChainBox;

/// Lifecycle of a tracked box.
///
/// `Queued` means bucketed by height but not yet old enough; `Claimable`
/// means height-eligible and awaiting a batch; `Batched`/`Submitted` mean
/// part of an in-flight transaction. `Confirmed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoxStatus {
    Discovered,
    Queued,
    Claimable,
    Batched,
    Submitted,
    Confirmed,
    Error,
}

impl BoxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BoxStatus::Confirmed | BoxStatus::Error)
    }
}

impl std::fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BoxStatus::Discovered => "Discovered",
            BoxStatus::Queued => "Queued",
            BoxStatus::Claimable => "Claimable",
            BoxStatus::Batched => "Batched",
            BoxStatus::Submitted => "Submitted",
            BoxStatus::Confirmed => "Confirmed",
            BoxStatus::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for BoxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Discovered" => Ok(BoxStatus::Discovered),
            "Queued" => Ok(BoxStatus::Queued),
            "Claimable" => Ok(BoxStatus::Claimable),
            "Batched" => Ok(BoxStatus::Batched),
            "Submitted" => Ok(BoxStatus::Submitted),
            "Confirmed" => Ok(BoxStatus::Confirmed),
            "Error" => Ok(BoxStatus::Error),
            other => Err(format!("unknown box status: {}", other)),
        }
    }
}

/// A discovered box plus its claim lifecycle. The chain data is immutable
/// once discovered; only status, reason and the owning transaction change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedBox {
    pub chain_box: ChainBox,
    pub rent_fee: u128,
    pub status: BoxStatus,
    pub reason: Option<String>,
    pub tx_id: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl TrackedBox {
    pub fn new(chain_box: ChainBox, rent_fee: u128, status: BoxStatus) -> Self {
        Self {
            chain_box,
            rent_fee,
            status,
            reason: None,
            tx_id: None,
            discovered_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "Pending",
            TxStatus::Confirmed => "Confirmed",
            TxStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TxStatus::Pending),
            "Confirmed" => Ok(TxStatus::Confirmed),
            "Failed" => Ok(TxStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// One submitted claim transaction. Append-only except for its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_id: String,
    pub box_ids: Vec<String>,
    pub total_rent: u128,
    pub fee: u128,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
}
