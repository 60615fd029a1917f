use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

pub mod app_config;
pub mod producer_config;

pub use app_config::{SinkConfig, WorkerConfig, setup_resolver, setup_tls_connector};
pub use producer_config::ProducerConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where configuration values come from. The process environment in the
/// binaries, a plain map in tests.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `std::env`. Load `.env` with `dotenvy` before building configs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Trimmed value of `var`; unset and blank are both `None`.
fn lookup(env: &impl EnvSource, var: &'static str) -> Option<String> {
    env.get(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn required(env: &impl EnvSource, var: &'static str) -> Result<String, ConfigError> {
    lookup(env, var).ok_or(ConfigError::Missing(var))
}

pub(crate) fn optional(env: &impl EnvSource, var: &'static str) -> Option<String> {
    lookup(env, var)
}

pub(crate) fn parse_value<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

pub(crate) fn required_parse<T>(env: &impl EnvSource, var: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(var, required(env, var)?)
}

pub(crate) fn optional_parse<T>(
    env: &impl EnvSource,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(env, var) {
        Some(value) => parse_value(var, value),
        None => Ok(default),
    }
}

/// Splits a comma separated list, dropping blank entries.
pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
