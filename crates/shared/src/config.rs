//! Configuration management for the NPI directory scraper.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with defaults that target the public opennpi.com directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Target directory site layout
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// HTTP fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Pagination bounds
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Layout of the directory site being scraped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Scheme and host prepended to relative links
    pub base_origin: String,

    /// Path of the first search-result page
    pub start_path: String,

    /// Path of the landing page holding the summary tables
    pub summary_path: String,

    /// CSS selector of the search-result table
    pub table_selector: String,

    /// CSS selector of pagination anchors
    pub pagination_selector: String,

    /// Visible label of the "next page" control
    pub next_label: String,

    /// First-column texts that mark a header row
    pub header_labels: Vec<String>,

    /// CSS selector of summary sections on the landing page
    pub summary_section_selector: String,

    /// Summary headings that are skipped
    pub excluded_headings: Vec<String>,
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// User agents rotated per request (empty = client default)
    pub user_agents: Vec<String>,

    /// Proxy URLs rotated per request (empty = direct connection)
    pub proxies: Vec<String>,

    /// Status codes treated as anti-bot blocks
    pub block_statuses: Vec<u16>,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,

    /// Retry policy
    pub retry: RetryConfig,
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, including the first
    pub max_attempts: u32,

    /// Backoff strategy between attempts
    pub backoff: BackoffKind,

    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds
    pub max_delay_ms: u64,

    /// Maximum random extra delay in milliseconds
    pub jitter_ms: u64,
}

/// Backoff strategy name as written in the config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Pagination bounds configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Maximum pages fetched in one run
    pub max_pages: u32,

    /// Stop after this many consecutive pages without rows
    pub max_consecutive_empty_pages: u32,

    /// Pause between page fetches in milliseconds
    pub page_delay_ms: u64,

    /// Maximum random extra pause in milliseconds
    pub page_delay_jitter_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_origin: "https://opennpi.com".to_string(),
            start_path: "/provider".to_string(),
            summary_path: "/provider".to_string(),
            table_selector: "#search-result table".to_string(),
            pagination_selector: ".page-item a.page-link".to_string(),
            next_label: "Next Page".to_string(),
            header_labels: vec!["Provider Name".to_string(), "Name".to_string()],
            summary_section_selector: ".px-1 .col-12".to_string(),
            excluded_headings: vec!["Providers by Year".to_string()],
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
            ],
            proxies: Vec::new(),
            block_statuses: vec![403, 429],
            headers: BTreeMap::from([(
                "Accept-Language".to_string(),
                "en-US,en;q=0.9".to_string(),
            )]),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 15_000,
            jitter_ms: 250,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_consecutive_empty_pages: 2,
            page_delay_ms: 500,
            page_delay_jitter_ms: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            directory: DirectoryConfig::default(),
            fetch: FetchConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load configuration from a TOML file or fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::from_file(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            Self::default()
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Reject settings the scraper cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pagination.max_pages == 0 {
            bail!("pagination.max_pages must be at least 1");
        }
        if self.pagination.max_consecutive_empty_pages == 0 {
            bail!("pagination.max_consecutive_empty_pages must be at least 1");
        }
        if self.fetch.retry.max_attempts == 0 {
            bail!("fetch.retry.max_attempts must be at least 1");
        }
        if self.fetch.timeout_ms == 0 {
            bail!("fetch.timeout_ms must be greater than 0");
        }
        if !self.directory.base_origin.starts_with("http://")
            && !self.directory.base_origin.starts_with("https://")
        {
            bail!(
                "directory.base_origin must be an http(s) origin, got {:?}",
                self.directory.base_origin
            );
        }
        Ok(())
    }

    /// Get the absolute path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        let log_path = Path::new(&self.logging.log_dir);
        if log_path.is_absolute() {
            log_path.to_path_buf()
        } else {
            self.data_dir().join(log_path)
        }
    }

    /// Absolute URL of the first search-result page
    pub fn start_url(&self) -> String {
        self.directory_url(&self.directory.start_path)
    }

    /// Absolute URL of the summary landing page
    pub fn summary_url(&self) -> String {
        self.directory_url(&self.directory.summary_path)
    }

    /// Resolve a path or URL against the configured origin
    pub fn directory_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!(
                "{}/{}",
                self.directory.base_origin.trim_end_matches('/'),
                path_or_url.trim_start_matches('/')
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.root_dir, "data");
        assert_eq!(config.directory.base_origin, "https://opennpi.com");
        assert_eq!(config.fetch.retry.backoff, BackoffKind::Exponential);
        assert_eq!(config.fetch.block_statuses, vec![403, 429]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.pagination.max_pages = 7;
        original_config.fetch.proxies = vec!["http://127.0.0.1:8080".to_string()];
        original_config.save(&config_path)?;

        assert!(config_path.exists());

        let loaded_config = Config::from_file(&config_path)?;
        assert_eq!(loaded_config.data.root_dir, original_config.data.root_dir);
        assert_eq!(loaded_config.pagination.max_pages, 7);
        assert_eq!(loaded_config.fetch.proxies, original_config.fetch.proxies);
        assert_eq!(
            loaded_config.directory.next_label,
            original_config.directory.next_label
        );

        Ok(())
    }

    #[test]
    fn test_partial_config_uses_section_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[data]
root_dir = "out"

[logging]
log_dir = "logs"
default_level = "debug"
console = true
file = false
json_format = false

[pagination]
max_pages = 3

[fetch.retry]
backoff = "fixed"
"#,
        )?;

        let config = Config::from_file(&config_path)?;
        assert_eq!(config.pagination.max_pages, 3);
        assert_eq!(config.pagination.max_consecutive_empty_pages, 2);
        assert_eq!(config.fetch.retry.backoff, BackoffKind::Fixed);
        assert_eq!(config.fetch.retry.max_attempts, 3);
        assert_eq!(config.directory.table_selector, "#search-result table");

        Ok(())
    }

    #[test]
    fn test_zero_limits_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.pagination.max_pages = 0;
        config.save(&config_path)?;

        assert!(Config::from_file(&config_path).is_err());
        assert_eq!(Config::load_or_default(&config_path).pagination.max_pages, 50);

        Ok(())
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.data.root_dir, "data");
    }

    #[test]
    fn test_url_resolution() {
        let config = Config::default();
        assert_eq!(config.start_url(), "https://opennpi.com/provider");
        assert_eq!(
            config.directory_url("/provider/state/ca"),
            "https://opennpi.com/provider/state/ca"
        );
        assert_eq!(
            config.directory_url("https://example.test/x"),
            "https://example.test/x"
        );
        assert!(config.log_dir().ends_with("data/logs"));
    }
}
