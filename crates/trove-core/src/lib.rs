//! Configuration loading and construction of the Trove component graph.

pub mod bootstrap;
pub mod config;

pub use config::{Config, ConfigError, Secret};
