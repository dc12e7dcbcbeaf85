//! # Configuration Modules
//!
//! Layered configuration for the studio binaries: built-in defaults, an
//! optional JSON5 file, then environment variables and command line flags.

/// The `StudioConfig` layers and their conversion into library settings.
pub mod studio_config;

pub use studio_config::{load_config, load_config_from, ConfigError, StudioConfig};
