//! # Logging
//!
//! Installs the `log` backend used by the studio binaries.

/// `fern` dispatcher with a colored console and a rotated log file.
pub mod setup;

pub use setup::{rotate_logs, setup_logging, LoggingOptions};
