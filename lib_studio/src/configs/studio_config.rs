use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{PipelineConfig, PlayerConfig};

const CONFIG_FILE_NAME: &str = "studio.json5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// # Studio Config
///
/// Every field is optional so layers can be merged: a `Some` in a later layer
/// overrides the earlier one. The same struct is parsed from the command line
/// (with environment fallbacks) and deserialized from the JSON5 file.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StudioConfig {
    #[clap(long, env = "STUDIO_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STUDIO_LOG_DIR", help = "Directory for log files. No file logging when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STUDIO_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STUDIO_FRAME_INTERVAL_MS", help = "Frame coalescing window in milliseconds.")]
    pub frame_interval_ms: Option<u64>,

    #[clap(long, env = "STUDIO_BUFFER_CAPACITY", help = "Maximum buffered messages between two frames.")]
    pub buffer_capacity: Option<usize>,

    #[clap(long, env = "STUDIO_BUFFER_MAX_BYTES", help = "Maximum estimated buffered bytes between two frames.")]
    pub buffer_max_bytes: Option<usize>,

    #[clap(long, env = "STUDIO_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "STUDIO_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "STUDIO_MAX_RECONNECT_ATTEMPTS", help = "Failed connects tolerated before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "STUDIO_SERVICE_CALL_TIMEOUT_MS", help = "Service call timeout in milliseconds.")]
    pub service_call_timeout_ms: Option<u64>,

    #[clap(long, env = "STUDIO_MAX_SEARCH_RESULTS", help = "Maximum topic search hits (0 = unlimited).")]
    pub max_search_results: Option<usize>,

    #[clap(long, env = "STUDIO_PLAYBACK_SPEED", help = "Replay speed factor.")]
    pub playback_speed: Option<f64>,
}

impl StudioConfig {
    /// Built-in defaults, mirroring `PipelineConfig::default()`.
    pub fn defaults() -> Self {
        let player = PlayerConfig::default();
        Self {
            config_path: None,
            log_dir: None,
            log_level: Some("info".to_string()),
            frame_interval_ms: Some(player.frame_interval.as_millis() as u64),
            buffer_capacity: Some(player.buffer_capacity),
            buffer_max_bytes: Some(player.buffer_max_bytes),
            reconnect_base_delay_ms: Some(player.reconnect_base_delay.as_millis() as u64),
            reconnect_max_delay_ms: Some(player.reconnect_max_delay.as_millis() as u64),
            max_reconnect_attempts: Some(player.max_reconnect_attempts),
            service_call_timeout_ms: Some(player.service_call_timeout.as_millis() as u64),
            max_search_results: Some(0),
            playback_speed: Some(1.0),
        }
    }

    /// Merges two configs; `Some` values of `other` win.
    pub fn merge(self, other: StudioConfig) -> StudioConfig {
        StudioConfig {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            frame_interval_ms: other.frame_interval_ms.or(self.frame_interval_ms),
            buffer_capacity: other.buffer_capacity.or(self.buffer_capacity),
            buffer_max_bytes: other.buffer_max_bytes.or(self.buffer_max_bytes),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            service_call_timeout_ms: other.service_call_timeout_ms.or(self.service_call_timeout_ms),
            max_search_results: other.max_search_results.or(self.max_search_results),
            playback_speed: other.playback_speed.or(self.playback_speed),
        }
    }

    /// Reads one JSON5 config file.
    pub fn from_file(path: &Path) -> Result<StudioConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json5::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.log_level.as_deref().map(str::to_lowercase).as_deref() {
            Some("trace") => log::LevelFilter::Trace,
            Some("debug") => log::LevelFilter::Debug,
            Some("warn") => log::LevelFilter::Warn,
            Some("error") => log::LevelFilter::Error,
            Some("off") => log::LevelFilter::Off,
            _ => log::LevelFilter::Info,
        }
    }

    pub fn player_config(&self) -> Result<PlayerConfig, ConfigError> {
        let defaults = PlayerConfig::default();
        let millis = |value: Option<u64>, default: Duration| value.map(Duration::from_millis).unwrap_or(default);
        let config = PlayerConfig {
            frame_interval: millis(self.frame_interval_ms, defaults.frame_interval),
            buffer_capacity: self.buffer_capacity.unwrap_or(defaults.buffer_capacity),
            buffer_max_bytes: self.buffer_max_bytes.unwrap_or(defaults.buffer_max_bytes),
            reconnect_base_delay: millis(self.reconnect_base_delay_ms, defaults.reconnect_base_delay),
            reconnect_max_delay: millis(self.reconnect_max_delay_ms, defaults.reconnect_max_delay),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_reconnect_attempts),
            service_call_timeout: millis(self.service_call_timeout_ms, defaults.service_call_timeout),
            command_buffer: defaults.command_buffer,
        };
        if config.frame_interval.is_zero() {
            return Err(ConfigError::Invalid("frameIntervalMs must be greater than 0".into()));
        }
        if config.buffer_capacity == 0 || config.buffer_max_bytes == 0 {
            return Err(ConfigError::Invalid("buffer limits must be greater than 0".into()));
        }
        if config.reconnect_base_delay > config.reconnect_max_delay {
            return Err(ConfigError::Invalid(
                "reconnectBaseDelayMs must not exceed reconnectMaxDelayMs".into(),
            ));
        }
        Ok(config)
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        Ok(PipelineConfig {
            player: self.player_config()?,
            max_search_results: self.max_search_results.unwrap_or(0),
        })
    }

    pub fn playback_speed(&self) -> Result<f64, ConfigError> {
        match self.playback_speed {
            Some(speed) if !speed.is_finite() || speed <= 0.0 => Err(ConfigError::Invalid(format!(
                "playbackSpeed must be positive, got {}",
                speed
            ))),
            Some(speed) => Ok(speed),
            None => Ok(1.0),
        }
    }
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("studio").join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}

/// # Load Config
///
/// Resolves the effective configuration from the layers, lowest first:
/// 1.  Built-in defaults.
/// 2.  The JSON5 file named by `--config-path` / `STUDIO_CONFIG_PATH`, or
///     `studio.json5` in the working or user config directory when present.
/// 3.  Environment variables and command line flags (`cli`).
pub fn load_config_from(cli: StudioConfig) -> Result<StudioConfig, ConfigError> {
    let mut config = StudioConfig::defaults();

    match &cli.config_path {
        Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.clone())),
        Some(path) => config = config.merge(StudioConfig::from_file(path)?),
        None => {
            let path = default_config_path();
            if path.exists() {
                config = config.merge(StudioConfig::from_file(&path)?);
            } else {
                log::debug!(
                    "Config file not found at {}. Using defaults and environment/CLI variables.",
                    path.display()
                );
            }
        }
    }

    let config = config.merge(cli);
    config.player_config()?;
    config.playback_speed()?;
    Ok(config)
}

/// `load_config_from` with the process's own command line.
pub fn load_config() -> Result<StudioConfig, ConfigError> {
    load_config_from(StudioConfig::parse())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("studio.json5");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "{ // comments are fine\n frameIntervalMs: 50, bufferCapacity: 10, logLevel: 'debug' }",
        );
        let cli = StudioConfig {
            config_path: Some(path),
            buffer_capacity: Some(20),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.frame_interval_ms, Some(50));
        assert_eq!(config.buffer_capacity, Some(20));
        assert_eq!(config.log_level(), log::LevelFilter::Debug);

        let player = config.player_config().unwrap();
        assert_eq!(player.frame_interval, Duration::from_millis(50));
        assert_eq!(player.buffer_capacity, 20);
        assert_eq!(player.max_reconnect_attempts, PlayerConfig::default().max_reconnect_attempts);
    }

    #[test]
    fn flags_parse_into_the_cli_layer() {
        let cli = StudioConfig::try_parse_from(["studio", "--max-search-results", "5"]).unwrap();
        assert_eq!(cli.max_search_results, Some(5));
        let config = StudioConfig::defaults().merge(cli);
        assert_eq!(config.pipeline_config().unwrap().max_search_results, 5);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let cli = StudioConfig {
            config_path: Some(PathBuf::from("/definitely/not/here/studio.json5")),
            ..Default::default()
        };
        assert!(matches!(load_config_from(cli), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{ frameIntervalMs: 'fast' }");
        assert!(matches!(
            StudioConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn inconsistent_values_are_rejected() {
        let config = StudioConfig {
            reconnect_base_delay_ms: Some(5_000),
            reconnect_max_delay_ms: Some(100),
            ..StudioConfig::defaults()
        };
        assert!(matches!(config.player_config(), Err(ConfigError::Invalid(_))));

        let config = StudioConfig {
            playback_speed: Some(0.0),
            ..StudioConfig::defaults()
        };
        assert!(config.playback_speed().is_err());
    }
}
