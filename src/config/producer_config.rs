use std::path::PathBuf;

use super::{ConfigError, EnvSource, optional, optional_parse, required, split_list};
use crate::producer::RoutingStrategy;

pub const DEFAULT_SEED_FILE: &str = "million.csv";
pub const DEFAULT_SEED_COLUMN: usize = 2;
pub const DEFAULT_ROUTING_KEY: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub amqp_url: String,
    pub exchange: String,
    pub seed_file: PathBuf,
    pub seed_column: usize,
    pub routing: RoutingStrategy,
}

impl ProducerConfig {
    /// `ROUTING_SHARDS` takes precedence over `ROUTING_KEY`.
    pub fn from_env(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let routing = match optional(env, "ROUTING_SHARDS").map(|shards| split_list(&shards)) {
            Some(shards) if !shards.is_empty() => RoutingStrategy::Hashed(shards),
            _ => RoutingStrategy::Fixed(
                optional(env, "ROUTING_KEY").unwrap_or_else(|| DEFAULT_ROUTING_KEY.to_string()),
            ),
        };

        Ok(Self {
            amqp_url: required(env, "AMQP_URL")?,
            exchange: required(env, "EXCHANGE_NAME")?,
            seed_file: optional(env, "SEED_FILE")
                .unwrap_or_else(|| DEFAULT_SEED_FILE.to_string())
                .into(),
            seed_column: optional_parse(env, "SEED_COLUMN", DEFAULT_SEED_COLUMN)?,
            routing,
        })
    }
}
