//! Ready-made `tracing` subscriber for embedders
//!
//! The crate itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`setup_logging`] once at startup.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Target used by every event emitted from this crate
pub const LOG_TARGET: &str = "rvoip_quality_core";

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level for all targets
    pub level: Level,
    /// Separate level for quality monitoring events, e.g. `trace` to see
    /// every pulled sample without raising the global level
    pub quality_level: Option<Level>,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            quality_level: None,
            json: false,
            file_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn with_quality_level(mut self, level: Level) -> Self {
        self.quality_level = Some(level);
        self
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Build the filter; `RUST_LOG` directives are honoured first
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if let Some(level) = self.quality_level {
            let directive = format!("{}={}", LOG_TARGET, level)
                .parse::<Directive>()
                .map_err(|e| Error::config(format!("invalid log directive: {}", e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install a global subscriber. Fails if one is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter()?)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::config(format!("failed to install subscriber: {}", e)))
}

/// Parse a log level such as `"debug"` or `"WARN"`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::config(format!("invalid log level: {}", level)))
}
