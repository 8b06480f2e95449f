//! tracing setup shared by `plex-queue` and `plex-send`
//!
//! Logs always go to stderr. `plex-queue` prints queue listings on stdout and
//! `plex-send` may run under a supervisor that captures stdout, so neither
//! may interleave log lines with its output.
//!
//! Resolution order for the filter: `RUST_LOG`, then `--verbose` (debug),
//! then `PLEXCAST_LOG_LEVEL`, then the binary's own default level.
//!
//! ```no_run
//! use libplexcast::logging::{LogFormat, LoggingConfig};
//!
//! // A daemon feeding a log shipper
//! LoggingConfig::from_env(Some(LogFormat::Json), false, "info").init();
//! ```

use std::str::FromStr;

pub const LOG_FORMAT_ENV: &str = "PLEXCAST_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "PLEXCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One plain line per event
    Text,
    /// Flattened JSON objects with span context
    Json,
    /// Multi-line, coloured
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `libplexcast::scheduler=debug`
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Read `PLEXCAST_LOG_FORMAT` and `PLEXCAST_LOG_LEVEL`
    ///
    /// A `format` from the command line beats the environment. An
    /// unparseable format variable falls back to text.
    pub fn from_env(format: Option<LogFormat>, verbose: bool, default_level: &str) -> Self {
        let format = format
            .or_else(|| {
                std::env::var(LOG_FORMAT_ENV)
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(LogFormat::Text);

        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());

        Self::new(format, level, verbose)
    }

    /// Directive used when `RUST_LOG` is unset
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber; a second call is a no-op
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => builder.with_target(false).try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Subscriber already installed, keeping it");
        }
    }
}
