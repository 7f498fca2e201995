//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Project YAML files under `.flow-triage/`
//! - Environment variable overrides
//! - Configuration validation

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, CONFIG_DIR};
