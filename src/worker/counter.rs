use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// Count of handled messages shared by every worker task. Logs progress
/// every `every` messages.
#[derive(Debug)]
pub struct ProcessedCounter {
    count: AtomicU64,
    started: Instant,
    every: u64,
}

impl ProcessedCounter {
    pub fn new(every: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            started: Instant::now(),
            every: every.max(1),
        }
    }

    /// Count one handled message and return the new total.
    pub fn record(&self) -> u64 {
        let handled = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if handled % self.every == 0 {
            log::info!(
                "Handled message {handled}, {:.2}s since startup",
                self.started.elapsed().as_secs_f64()
            );
        }
        handled
    }

    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for ProcessedCounter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_EVERY)
    }
}
