//! Delivery lifecycle as typestate: every transition consumes the state it
//! leaves, so a delivery can neither skip probing nor be settled twice.

use std::fmt;

use hyper::Method;

use crate::queue::{Delivery, QueueError};
use crate::task::ProbeTask;

/// How a delivery was settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Acknowledged,
    RejectedNoRequeue,
    RejectedRequeue,
    AcknowledgedAndForwarded,
}

impl DeliveryOutcome {
    /// Whether the broker should hand the task out again.
    pub fn requeues(self) -> bool {
        matches!(self, DeliveryOutcome::RejectedRequeue)
    }

    pub fn is_ack(self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Acknowledged | DeliveryOutcome::AcknowledgedAndForwarded
        )
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryOutcome::Acknowledged => "acknowledged",
            DeliveryOutcome::RejectedNoRequeue => "rejected",
            DeliveryOutcome::RejectedRequeue => "requeued",
            DeliveryOutcome::AcknowledgedAndForwarded => "forwarded",
        };
        f.write_str(name)
    }
}

/// A delivery that has just arrived.
#[derive(Debug)]
pub struct Received {
    delivery: Delivery,
}

impl Received {
    pub fn new(delivery: Delivery) -> Self {
        Self { delivery }
    }

    pub fn start_probe(self, method: Method) -> Probing {
        let task = ProbeTask::from_payload(self.delivery.payload(), method);
        Probing {
            delivery: self.delivery,
            task,
        }
    }
}

/// A delivery whose task is being probed.
#[derive(Debug)]
pub struct Probing {
    delivery: Delivery,
    task: ProbeTask,
}

impl Probing {
    pub fn task(&self) -> &ProbeTask {
        &self.task
    }

    /// The target could not be probed. Requeueing would only fail again.
    pub fn probe_failed(self) -> Settled {
        self.settle(DeliveryOutcome::RejectedNoRequeue)
    }

    pub fn logged(self) -> Settled {
        self.settle(DeliveryOutcome::Acknowledged)
    }

    pub fn forwarded(self) -> Settled {
        self.settle(DeliveryOutcome::AcknowledgedAndForwarded)
    }

    /// The results channel was unavailable; let the broker redeliver later.
    pub fn forward_failed(self) -> Settled {
        self.settle(DeliveryOutcome::RejectedRequeue)
    }

    fn settle(self, outcome: DeliveryOutcome) -> Settled {
        Settled {
            delivery: self.delivery,
            outcome,
        }
    }
}

/// A delivery with a decided outcome, not yet reported to the broker.
#[derive(Debug)]
pub struct Settled {
    delivery: Delivery,
    outcome: DeliveryOutcome,
}

impl Settled {
    pub fn outcome(&self) -> DeliveryOutcome {
        self.outcome
    }

    /// Report the outcome to the broker.
    pub async fn commit(self) -> Result<DeliveryOutcome, QueueError> {
        self.delivery.settle(self.outcome).await?;
        Ok(self.outcome)
    }
}
