pub mod db;
pub mod models;

pub use db::{Database, HarvestStats};
pub use models::{BoxStatus, TrackedBox, TxRecord, TxStatus};
