pub mod counter;
pub mod pool;

pub use counter::ProcessedCounter;
pub use pool::{PoolSummary, WorkerPool};
