//! Logging infrastructure for the scraper.
//!
//! Structured `tracing` output to stderr (stdout is reserved for scrape
//! results) and an optional daily-rolling log file.

use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log directory path
    pub log_dir: String,
    /// Component name (used for log file naming)
    pub component: String,
    /// Default log level
    pub default_level: Level,
    /// Enable console output
    pub console: bool,
    /// Enable file output
    pub file: bool,
    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: "data/logs".to_string(),
            component: "npi-scraper".to_string(),
            default_level: Level::INFO,
            console: true,
            file: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Build from the `[logging]` section of a loaded config.
    ///
    /// `verbose` forces DEBUG regardless of the configured level; an
    /// unrecognised level string falls back to INFO.
    pub fn from_config(config: &Config, component: &str, verbose: bool) -> Self {
        let default_level = if verbose {
            Level::DEBUG
        } else {
            Level::from_str(&config.logging.default_level).unwrap_or(Level::INFO)
        };

        Self {
            log_dir: config.log_dir().to_string_lossy().to_string(),
            component: component.to_string(),
            default_level,
            console: config.logging.console,
            file: config.logging.file,
            json_format: config.logging.json_format,
        }
    }

    /// Filter directives used when `RUST_LOG` is not set
    fn default_directives(&self) -> String {
        let level = self.default_level;
        format!(
            "{}={level},npi_scraper={level},shared={level},hyper=warn,reqwest=warn,h2=warn,html5ever=warn,selectors=warn",
            self.component.replace('-', "_"),
        )
    }
}

/// Initialize logging with the given configuration
///
/// Sets up tracing with:
/// - Console output on stderr
/// - Daily file rotation under `log_dir`
/// - `RUST_LOG` override of the default directives
/// - Optional JSON formatting for the file layer
pub fn init(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let mut layers = Vec::new();

    if config.console {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_span_events(FmtSpan::NONE)
            .with_writer(std::io::stderr)
            .boxed();
        layers.push(console_layer);
    }

    if config.file {
        let log_dir = Path::new(&config.log_dir);
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", config.log_dir))?;

        let file_appender = tracing_appender::rolling::daily(log_dir, &config.component);

        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(file_appender)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(file_appender)
                .boxed()
        };

        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::info!(
        component = %config.component,
        log_dir = %config.log_dir,
        file = config.file,
        "Logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.component, "npi-scraper");
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.console);
        assert!(config.file);
    }

    #[test]
    fn test_from_config_levels() {
        let mut config = Config::default();
        config.logging.default_level = "warn".to_string();

        let quiet = LogConfig::from_config(&config, "npi-scraper", false);
        assert_eq!(quiet.default_level, Level::WARN);
        assert!(quiet.log_dir.ends_with("logs"));

        let verbose = LogConfig::from_config(&config, "npi-scraper", true);
        assert_eq!(verbose.default_level, Level::DEBUG);

        config.logging.default_level = "chatty".to_string();
        let fallback = LogConfig::from_config(&config, "npi-scraper", false);
        assert_eq!(fallback.default_level, Level::INFO);
    }

    #[test]
    fn test_default_directives_use_crate_target() {
        let config = LogConfig {
            default_level: Level::DEBUG,
            ..Default::default()
        };
        let directives = config.default_directives();
        assert!(directives.starts_with("npi_scraper=DEBUG"));
        assert!(directives.contains("reqwest=warn"));
    }
}
