pub mod config;
pub mod delivery;
pub mod http_probe;
pub mod logging;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod task;
pub mod worker;
