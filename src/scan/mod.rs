pub mod queue;
pub mod scanner;

pub use queue::{EligibilityQueue, Promotion, QueueStatus};
pub use scanner::{EligibilityScanner, ScanCursor, ScanDelta};
