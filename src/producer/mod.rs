use std::fmt;
use std::sync::Arc;

use crate::http_probe::report;
use crate::queue::Publish;
use crate::worker::counter::DEFAULT_PROGRESS_EVERY;

pub mod seed;

pub use seed::{SeedError, SeedRecord, open_seed_file, read_seeds};

/// How a task's routing key is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Every task goes to the same binding.
    Fixed(String),
    /// Tasks are spread over shards by a stable hash of the target, so the
    /// same target always lands on the same shard.
    Hashed(Vec<String>),
}

impl RoutingStrategy {
    pub fn key_for(&self, target: &str) -> &str {
        match self {
            RoutingStrategy::Fixed(key) => key,
            RoutingStrategy::Hashed(shards) if shards.is_empty() => "",
            RoutingStrategy::Hashed(shards) => {
                let index = fnv1a(target.as_bytes()) % shards.len() as u64;
                &shards[index as usize]
            }
        }
    }
}

/// 64-bit FNV-1a; stable across processes and releases, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSummary {
    pub published: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl fmt::Display for ProducerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} published, {} failed, {} skipped",
            self.published, self.failed, self.skipped
        )
    }
}

/// Publishes one task per seed record. Publishing is fire-and-forget: a
/// failed publish is logged and counted, never retried.
pub struct Producer {
    publisher: Arc<dyn Publish>,
    routing: RoutingStrategy,
    progress_every: u64,
}

impl Producer {
    pub fn new(publisher: Arc<dyn Publish>, routing: RoutingStrategy) -> Self {
        Self {
            publisher,
            routing,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    /// Stops at the first unreadable seed record.
    pub async fn run<I>(&self, seeds: I) -> Result<ProducerSummary, SeedError>
    where
        I: IntoIterator<Item = Result<SeedRecord, SeedError>>,
    {
        let mut summary = ProducerSummary::default();
        let mut seen = 0u64;

        for seed in seeds {
            let seed = seed?;
            seen += 1;
            if seed.target.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let routing_key = self.routing.key_for(&seed.target);
            if seen % self.progress_every == 0 {
                log::info!("Added item {seen} to {routing_key}");
            }

            match self
                .publisher
                .publish(routing_key, seed.target.as_bytes())
                .await
            {
                Ok(()) => summary.published += 1,
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("Failed to publish {}: {}", seed.target, report(&e));
                }
            }
        }

        log::info!("Added {seen} records total ({summary})");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::testing::RecordingPublisher;

    fn seeds(targets: &[&str]) -> Vec<Result<SeedRecord, SeedError>> {
        targets
            .iter()
            .map(|t| {
                Ok(SeedRecord {
                    target: t.to_string(),
                })
            })
            .collect()
    }

    #[test]
    fn test_fixed_routing() {
        let routing = RoutingStrategy::Fixed("us-east-1".to_string());
        assert_eq!(routing.key_for("example.com"), "us-east-1");
    }

    #[test]
    fn test_hashed_routing_is_stable_and_spreads() {
        let shards = vec![
            "us-east-1".to_string(),
            "us-east-2".to_string(),
            "us-west-2".to_string(),
        ];
        let routing = RoutingStrategy::Hashed(shards.clone());

        let key = routing.key_for("example.com");
        assert_eq!(routing.key_for("example.com"), key);
        assert!(shards.iter().any(|s| s == key));

        let used: std::collections::HashSet<&str> = (0..100)
            .map(|i| routing.key_for(&format!("host{i}.example")))
            .collect();
        assert_eq!(used.len(), 3);
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn test_publishes_one_task_per_record() {
        let publisher = Arc::new(RecordingPublisher::default());
        let producer = Producer::new(
            publisher.clone(),
            RoutingStrategy::Fixed("us-east-1".to_string()),
        );

        let summary = producer
            .run(seeds(&["google.com", "", "example.com"]))
            .await
            .expect("seeds are readable");

        assert_eq!(
            summary,
            ProducerSummary {
                published: 2,
                failed: 0,
                skipped: 1
            }
        );
        let sent = publisher.sent.lock().expect("lock");
        assert_eq!(
            *sent,
            vec![
                ("us-east-1".to_string(), b"google.com".to_vec()),
                ("us-east-1".to_string(), b"example.com".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted_not_retried() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let producer = Producer::new(publisher, RoutingStrategy::Fixed("k".to_string()));

        let summary = producer
            .run(seeds(&["a.com", "b.com"]))
            .await
            .expect("seeds are readable");
        assert_eq!(summary.published, 0);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_unreadable_seed_stops_the_run() {
        let producer = Producer::new(
            Arc::new(RecordingPublisher::default()),
            RoutingStrategy::Fixed("k".to_string()),
        );
        let records = vec![
            Ok(SeedRecord {
                target: "a.com".to_string(),
            }),
            Err(SeedError::MissingColumn {
                record: 2,
                column: 2,
            }),
        ];
        assert!(producer.run(records).await.is_err());
    }
}
