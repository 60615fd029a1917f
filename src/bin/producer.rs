use std::sync::Arc;

use anyhow::Context;
use tracebox::{
    config::{ProcessEnv, ProducerConfig},
    http_probe::report,
    logging,
    producer::{Producer, open_seed_file},
    queue::amqp::AmqpBroker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init(&ProcessEnv);

    let config = ProducerConfig::from_env(&ProcessEnv).context("invalid producer configuration")?;
    let seeds = open_seed_file(&config.seed_file, config.seed_column)
        .context("failed to open seed file")?;

    let broker = AmqpBroker::connect(&config.amqp_url)
        .await
        .context("failed to connect to broker")?;
    let publisher = broker
        .publisher(&config.exchange, false)
        .await
        .context("failed to open publishing channel")?;

    let producer = Producer::new(Arc::new(publisher), config.routing.clone());
    let summary = producer.run(seeds).await;

    if let Err(e) = broker.close().await {
        log::warn!("Failed to close broker connection: {}", report(&e));
    }

    let summary = summary.context("failed to read seed file")?;
    log::info!("Seeded {}: {summary}", config.seed_file.display());
    Ok(())
}
