pub mod batch;
pub mod engine;
pub mod submit;

pub use batch::{partition, BatchBuilder, ClaimBatch};
pub use engine::{CycleResult, HarvestEngine, ScanSummary, SubmittedTx};
pub use submit::{poll_confirmations, PollOutcome, SubmissionMonitor};
