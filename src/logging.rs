//! Logging setup.
//!
//! Structured logging goes through `tracing`. Output can go to stdout, to a
//! daily rolling file, or both, as plain text or JSON.

use std::io;
use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{prelude::*, EnvFilter, Layer};

use crate::config::LoggingSettings;

/// Log initialization options.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log level (default: INFO)
    pub level: Level,

    /// Whether to log to stdout (default: true)
    pub log_to_stdout: bool,

    /// Whether to log to a file (default: false)
    pub log_to_file: bool,

    /// Directory to store log files (default: "./logs")
    pub log_dir: String,

    /// Base filename for log files (default: "vpnservice")
    pub log_file_name: String,

    /// Whether to use JSON format for logs (default: false)
    pub json_format: bool,

    /// Whether to include file and line information (default: false)
    pub include_file_line: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            level: Level::INFO,
            log_to_stdout: true,
            log_to_file: false,
            log_dir: "./logs".to_string(),
            log_file_name: "vpnservice".to_string(),
            json_format: false,
            include_file_line: false,
        }
    }
}

impl LogOptions {
    /// Derive options from the `[logging]` settings table.
    ///
    /// Unknown level names fall back to INFO.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        LogOptions {
            level: parse_level(&settings.level).unwrap_or(Level::INFO),
            log_to_file: settings.log_to_file,
            log_dir: settings.log_dir.clone(),
            log_file_name: settings.log_file_name.clone(),
            json_format: settings.json,
            ..Default::default()
        }
    }
}

/// Parse a level name such as "debug" (case-insensitive).
pub fn parse_level(level: &str) -> Option<Level> {
    Level::from_str(level.trim()).ok()
}

/// Install the global subscriber described by `options`.
///
/// `RUST_LOG` takes precedence over `options.level` when set. The returned
/// guard flushes the file writer on drop and must outlive all logging. If a
/// subscriber is already installed this only opens the log file.
pub fn init_logging(options: LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(options.level.into())
        .from_env_lossy();

    let (file_writer, guard) = if options.log_to_file {
        let appender =
            RollingFileAppender::new(Rotation::DAILY, &options.log_dir, &options.log_file_name);
        let (writer, guard) = NonBlocking::new(appender);
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    let stdout_layer = options
        .log_to_stdout
        .then(|| output_layer(&options, io::stdout, true));
    let file_layer = file_writer.map(|writer| output_layer(&options, writer, false));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn output_layer<S, W>(
    options: &LogOptions,
    writer: W,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(options.include_file_line)
        .with_line_number(options.include_file_line);

    if options.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tracing::warn;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = LoggingSettings {
            level: "trace".to_string(),
            json: true,
            log_to_file: true,
            log_dir: "/tmp/vpnservice-logs".to_string(),
            log_file_name: "svc".to_string(),
        };
        let options = LogOptions::from_settings(&settings);
        assert_eq!(options.level, Level::TRACE);
        assert!(options.json_format);
        assert!(options.log_to_file);
        assert!(options.log_to_stdout);
        assert_eq!(options.log_file_name, "svc");
    }

    #[test]
    fn test_init_logging_to_json_file() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap().to_string();

        let options = LogOptions {
            level: Level::DEBUG,
            log_to_stdout: false,
            log_to_file: true,
            log_dir,
            log_file_name: "test.log".to_string(),
            json_format: true,
            ..Default::default()
        };

        let guard = init_logging(options);
        assert!(guard.is_some());

        warn!(fd = 7, "Tunnel log check");

        // Dropping the guard flushes the non-blocking writer
        drop(guard);

        let mut lines = Vec::new();
        for entry in fs::read_dir(dir.path()).unwrap() {
            let content = fs::read_to_string(entry.unwrap().path()).unwrap();
            lines.extend(content.lines().map(str::to_string));
        }
        assert!(!lines.is_empty());

        let records: Vec<serde_json::Value> = lines
            .iter()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let record = records
            .iter()
            .find(|r| r["fields"]["message"] == "Tunnel log check")
            .expect("logged record");
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["fields"]["fd"], 7);
    }
}
