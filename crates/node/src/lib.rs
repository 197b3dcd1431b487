//! fragmesh node
//!
//! Configuration for running cluster nodes.

pub mod config;

pub use config::{Config, ConfigError};
