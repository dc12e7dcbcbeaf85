use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use colored::{ColoredString, Colorize};
use glob::glob;

/// # Logging Options
///
/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Used in the log file name (`<app_name>-<timestamp>.log`).
    pub app_name: String,
    pub level: log::LevelFilter,
    /// Directory for log files. Console only when `None`.
    pub log_dir: Option<PathBuf>,
    /// Older log files of the same app kept next to the new one.
    pub keep_files: usize,
    /// Color the console output.
    pub colored: bool,
}

impl LoggingOptions {
    pub fn new(app_name: impl Into<String>, level: log::LevelFilter) -> Self {
        Self {
            app_name: app_name.into(),
            level,
            log_dir: None,
            keep_files: 1,
            colored: true,
        }
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }
}

fn colored_level(level: log::Level) -> ColoredString {
    let text = level.to_string();
    match level {
        log::Level::Error => text.bright_red(),
        log::Level::Warn => text.bright_yellow(),
        log::Level::Info => text.bright_green(),
        log::Level::Debug => text.bright_white(),
        log::Level::Trace => text.bright_cyan(),
    }
}

/// Deletes all but the newest `keep` log files of `app_name` in `log_dir`.
/// File names carry a sortable timestamp, so name order is age order.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<usize> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("invalid log file pattern {}", pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep) {
        match fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {}", old_file.display(), e),
        }
    }
    Ok(removed)
}

/// # Setup Logging
///
/// Installs a global `fern` dispatcher: colored records on stdout and, when a
/// log directory is configured, plain records in a new timestamped file.
/// Returns the path of that file.
///
/// Fails if a logger is already installed.
pub fn setup_logging(options: &LoggingOptions) -> Result<Option<PathBuf>> {
    let colored = options.colored;
    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            let time = Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]").to_string();
            if colored {
                out.finish(format_args!(
                    "{}{}[{}] {}",
                    time.truecolor(128, 128, 128),
                    format!("[{}]", record.target()).truecolor(128, 128, 128),
                    colored_level(record.level()),
                    message
                ))
            } else {
                out.finish(format_args!("{}[{}][{}] {}", time, record.target(), record.level(), message))
            }
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new().level(options.level).chain(console);

    let mut log_path = None;
    if let Some(log_dir) = &options.log_dir {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
        rotate_logs(&options.app_name, log_dir, options.keep_files)?;

        let file_name = format!("{}-{}.log", options.app_name, Local::now().format("%Y%m%d_%H%M%S"));
        let path = log_dir.join(file_name);
        let file = fern::log_file(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{}[{}][{}] {}",
                        Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                        record.target(),
                        record.level(),
                        message
                    ))
                })
                .chain(file),
        );
        log_path = Some(path);
    }

    dispatch.apply().context("a logger is already installed")?;
    Ok(log_path)
}
