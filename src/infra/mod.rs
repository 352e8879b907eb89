//! Infrastructure - configuration and runtime metrics

pub mod config;
pub mod metrics;

pub use config::Config;
pub use metrics::Metrics;
