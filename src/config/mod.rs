//! Configuration management
//!
//! Node identity, listen address, data directory, mining and seed-peer
//! settings. Values come from an optional TOML file and environment
//! variables; there is no process-wide config state.

pub mod settings;

pub use settings::{Config, DEFAULT_MEMPOOL_THRESHOLD, DEFAULT_SEED_NODE};
