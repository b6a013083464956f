use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("node request failed: {0}")]
    Node(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("box not found on chain: {0}")]
    BoxNotFound(String),

    #[error("box {0} cannot cover its own rent")]
    InsufficientValue(String),

    #[error("collected rent {collected} does not cover the network fee {fee}")]
    InsufficientRent { collected: u128, fee: u128 },

    #[error("wallet cannot cover fee shortfall of {shortfall}")]
    InsufficientFunds { shortfall: u128 },

    #[error("signing failed: {0}")]
    Signer(String),

    #[error("transaction rejected by node: {0}")]
    Rejected(String),

    #[error("balance invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarvestError {
    /// Transient failures are retried on a later cycle instead of being
    /// recorded as terminal box state.
    pub fn is_transient(&self) -> bool {
        matches!(self, HarvestError::Node(_))
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
