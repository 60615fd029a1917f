use std::sync::Arc;

use anyhow::Context;
use tracebox::{
    config::{ProcessEnv, SinkConfig, WorkerConfig, setup_resolver, setup_tls_connector},
    delivery::{DeliveryController, DeliveryPolicy},
    http_probe::{prelude::*, report},
    logging,
    queue::amqp::{AmqpBroker, Topology},
    worker::WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init(&ProcessEnv);

    let config = WorkerConfig::from_env(&ProcessEnv).context("invalid worker configuration")?;
    log::info!(
        "Using DNS hosts {:?}, {} probes with a {:?} deadline, at most {} in flight",
        config.dns_hosts,
        config.probe_method,
        config.probe_timeout,
        config.max_workers
    );

    let connector = setup_tls_connector().context("failed to build TLS connector")?;
    let resolver = setup_resolver(&config.dns_hosts);
    let collector = TraceCollector::new(resolver, connector).with_timeout(config.probe_timeout);

    let broker = AmqpBroker::connect(&config.amqp_url)
        .await
        .context("failed to connect to broker")?;

    let policy = match &config.sink {
        SinkConfig::Log => DeliveryPolicy::Log,
        SinkConfig::Forward {
            exchange,
            routing_key,
        } => {
            let publisher = broker
                .publisher(exchange, true)
                .await
                .context("failed to open results channel")?;
            DeliveryPolicy::Forward {
                publisher: Arc::new(publisher),
                routing_key: routing_key.clone(),
            }
        }
    };
    log::info!("Delivering results with the {} policy", policy.name());

    let controller = Arc::new(DeliveryController::new(
        Arc::new(collector),
        policy,
        config.probe_method.clone(),
    ));

    let topology = Topology {
        exchange: config.exchange.clone(),
        queue: config.queue.clone(),
        routing_key: config.routing_key.clone(),
    };
    let consumer = broker
        .consume(&topology, config.prefetch)
        .await
        .context("failed to start consuming")?;

    let pool = WorkerPool::new(controller, config.max_workers);

    tokio::select! {
        summary = pool.run(consumer) => {
            log::info!("Delivery stream ended: {summary}");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down; unsettled deliveries return to the queue");
        }
    }

    if let Err(e) = broker.close().await {
        log::warn!("Failed to close broker connection: {}", report(&e));
    }
    Ok(())
}
