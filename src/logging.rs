use std::str::FromStr;

use env_logger::Builder;
use log::LevelFilter;

use crate::config::EnvSource;

/// Level from `LOG_LEVEL`, falling back to `info` when unset or unknown.
pub fn level_from(env: &impl EnvSource) -> LevelFilter {
    env.get("LOG_LEVEL")
        .map(|val| val.trim().to_lowercase())
        .and_then(|val| LevelFilter::from_str(&val).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the global logger. Chatty transport crates are held at `warn`.
pub fn init(env: &impl EnvSource) {
    Builder::new()
        .filter_level(level_from(env))
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("lapin", LevelFilter::Warn)
        .filter_module("trust_dns_proto", LevelFilter::Warn)
        .filter_module("trust_dns_resolver", LevelFilter::Warn)
        .init();
}
