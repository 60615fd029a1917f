use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use super::counter::ProcessedCounter;
use crate::delivery::{DeliveryController, DeliveryOutcome};
use crate::http_probe::report;
use crate::queue::{Delivery, QueueError};

/// Tally of everything a pool run handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub acknowledged: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub stream_errors: u64,
    pub panicked: u64,
}

impl PoolSummary {
    pub fn handled(&self) -> u64 {
        self.acknowledged + self.forwarded + self.rejected + self.requeued
    }

    fn tally(&mut self, joined: Result<DeliveryOutcome, JoinError>) {
        match joined {
            Ok(DeliveryOutcome::Acknowledged) => self.acknowledged += 1,
            Ok(DeliveryOutcome::AcknowledgedAndForwarded) => self.forwarded += 1,
            Ok(DeliveryOutcome::RejectedNoRequeue) => self.rejected += 1,
            Ok(DeliveryOutcome::RejectedRequeue) => self.requeued += 1,
            Err(e) => {
                self.panicked += 1;
                log::error!("Delivery task failed: {e}");
            }
        }
    }
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} handled ({} acknowledged, {} forwarded, {} rejected, {} requeued), {} stream errors",
            self.handled(),
            self.acknowledged,
            self.forwarded,
            self.rejected,
            self.requeued,
            self.stream_errors
        )
    }
}

/// Runs deliveries from one shared stream through a controller, with at most
/// `max_in_flight` probes running at any time regardless of broker prefetch.
pub struct WorkerPool {
    controller: Arc<DeliveryController>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    counter: Arc<ProcessedCounter>,
}

impl WorkerPool {
    pub fn new(controller: Arc<DeliveryController>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            controller,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            counter: Arc::new(ProcessedCounter::default()),
        }
    }

    pub fn with_counter(mut self, counter: Arc<ProcessedCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Consume `deliveries` until the stream ends, then wait for every
    /// in-flight delivery to settle.
    pub async fn run<S>(&self, mut deliveries: S) -> PoolSummary
    where
        S: Stream<Item = Result<Delivery, QueueError>> + Unpin,
    {
        let mut in_flight = JoinSet::new();
        let mut summary = PoolSummary::default();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                summary.tally(joined);
            }

            // A permit is taken before pulling, so no delivery waits in local
            // memory for a free slot.
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };
            let Some(next) = deliveries.next().await else {
                break;
            };

            match next {
                Ok(delivery) => {
                    let controller = self.controller.clone();
                    let counter = self.counter.clone();
                    in_flight.spawn(async move {
                        let outcome = controller.handle(delivery).await;
                        counter.record();
                        drop(permit);
                        outcome
                    });
                }
                Err(e) => {
                    summary.stream_errors += 1;
                    log::error!("Consumer error: {}", report(&e));
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            summary.tally(joined);
        }
        summary
    }
}
