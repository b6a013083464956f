pub mod client;
pub mod types;

pub use client::{LedgerNode, NodeHttpClient};
pub use types::{Asset, ChainBox, OutputCandidate, SignedClaimTx, UnsignedClaimTx, UnsignedInput};

#[cfg(test)]
pub use client::MockLedgerNode;
