use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
};

use super::{Acknowledge, Delivery, Publish, PublishError, QueueError};
use crate::delivery::DeliveryOutcome;

const CONSUMER_TAG: &str = "tracebox-worker";

/// Where tasks are consumed from: a queue bound to a direct exchange.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// A connection to an AMQP 0-9-1 broker.
pub struct AmqpBroker {
    connection: Connection,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        log::info!("Connected to broker");
        Ok(Self { connection })
    }

    /// Declare the task topology and start consuming with at most `prefetch`
    /// unacknowledged deliveries outstanding.
    pub async fn consume(
        &self,
        topology: &Topology,
        prefetch: u16,
    ) -> Result<AmqpConsumer, QueueError> {
        let channel = self.connection.create_channel().await?;
        declare_exchange(&channel, &topology.exchange).await?;
        channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &topology.queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        log::info!(
            "Consuming {} (exchange {}, routing key '{}', prefetch {prefetch})",
            topology.queue,
            topology.exchange,
            topology.routing_key
        );

        Ok(AmqpConsumer {
            _channel: channel,
            consumer,
        })
    }

    /// A publisher on its own channel. With `confirm`, each publish waits for
    /// the broker to take responsibility for the message.
    pub async fn publisher(&self, exchange: &str, confirm: bool) -> Result<AmqpPublisher, QueueError> {
        let channel = self.connection.create_channel().await?;
        declare_exchange(&channel, exchange).await?;
        if confirm {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
        }
        Ok(AmqpPublisher {
            channel,
            exchange: exchange.to_string(),
            confirm,
        })
    }

    pub async fn close(&self) -> Result<(), QueueError> {
        self.connection.close(200, "bye").await?;
        Ok(())
    }
}

async fn declare_exchange(channel: &Channel, exchange: &str) -> Result<(), QueueError> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Stream of task deliveries.
pub struct AmqpConsumer {
    _channel: Channel,
    consumer: Consumer,
}

impl Stream for AmqpConsumer {
    type Item = Result<Delivery, QueueError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.consumer.poll_next_unpin(cx).map(|next| {
            next.map(|delivery| {
                delivery
                    .map(|d| Delivery::new(d.data, d.redelivered, AmqpAcker(d.acker)))
                    .map_err(QueueError::from)
            })
        })
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn settle(self: Box<Self>, outcome: DeliveryOutcome) -> Result<(), QueueError> {
        if outcome.is_ack() {
            self.0.ack(BasicAckOptions::default()).await?;
        } else {
            let requeue = outcome.requeues();
            self.0.reject(BasicRejectOptions { requeue }).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
    exchange: String,
    confirm: bool,
}

#[async_trait]
impl Publish for AmqpPublisher {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.channel.status().connected() {
            return Err(PublishError::Unavailable(format!(
                "channel to {} is not connected",
                self.exchange
            )));
        }

        let broker_error = |source| PublishError::Broker {
            exchange: self.exchange.clone(),
            routing_key: routing_key.to_string(),
            source,
        };

        let confirm = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(broker_error)?;

        if !self.confirm {
            return Ok(());
        }

        match confirm.await.map_err(broker_error)? {
            Confirmation::Nack(_) => Err(PublishError::Refused {
                exchange: self.exchange.clone(),
                routing_key: routing_key.to_string(),
            }),
            _ => Ok(()),
        }
    }
}
