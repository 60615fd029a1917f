use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::DeliveryOutcome;

pub mod amqp;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error")]
    Broker(#[from] lapin::Error),
}

/// Publishing a message failed; the caller decides whether that is fatal.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to publish to {exchange} with routing key '{routing_key}'")]
    Broker {
        exchange: String,
        routing_key: String,
        #[source]
        source: lapin::Error,
    },
    #[error("broker refused message for {exchange} with routing key '{routing_key}'")]
    Refused {
        exchange: String,
        routing_key: String,
    },
    #[error("results channel unavailable: {0}")]
    Unavailable(String),
}

/// Settles one delivery with the broker. Consumed on use, so a delivery can
/// be settled at most once.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), QueueError>;
}

/// One message taken off the task queue.
pub struct Delivery {
    payload: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, acker: impl Acknowledge + 'static) -> Self {
        Self {
            payload,
            redelivered,
            acker: Box::new(acker),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_redelivery(&self) -> bool {
        self.redelivered
    }

    pub async fn settle(self, outcome: DeliveryOutcome) -> Result<(), QueueError> {
        self.acker.settle(outcome).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// Sends a payload to a downstream exchange.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), PublishError>;
}
