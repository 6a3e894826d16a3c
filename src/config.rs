//! Configuration loader and validator for the archiver.
use crate::accumulator::{AccumulatorOptions, OvershootPolicy};
use crate::pagination::MAX_PAGE_LIMIT;
use crate::transfer::TransferOptions;
use crate::tumblr::RateLimitPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub tumblr: Tumblr,
    #[serde(default)]
    pub extraction: Extraction,
    #[serde(default)]
    pub transfer: Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => Path::new(&home).join(rest),
                Err(_) => PathBuf::from(&self.data_dir),
            },
            None => PathBuf::from(&self.data_dir),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tumblr {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub rate_limit: RateLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimit {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Extraction {
    pub target_count: usize,
    pub page_limit: u32,
    pub max_iterations: usize,
    pub max_items: usize,
    pub overshoot: OvershootPolicy,
}

impl Default for Extraction {
    fn default() -> Self {
        let d = AccumulatorOptions::default();
        Self {
            target_count: d.target_count,
            page_limit: d.page_limit,
            max_iterations: d.max_iterations,
            max_items: d.max_items,
            overshoot: d.overshoot,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Transfer {
    pub batch_size: usize,
    pub delay_between_batches_ms: u64,
    pub delay_between_items_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            batch_size: 20,
            delay_between_batches_ms: 1000,
            delay_between_items_ms: 75,
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 60,
        }
    }
}

fn default_base_url() -> String {
    "https://api.tumblr.com/".to_string()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn accumulator_options(&self) -> AccumulatorOptions {
        AccumulatorOptions {
            target_count: self.extraction.target_count,
            page_limit: self.extraction.page_limit,
            max_iterations: self.extraction.max_iterations,
            max_items: self.extraction.max_items,
            overshoot: self.extraction.overshoot,
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        let t = &self.transfer;
        TransferOptions {
            batch_size: t.batch_size,
            delay_between_batches: Duration::from_millis(t.delay_between_batches_ms),
            delay_between_items: Duration::from_millis(t.delay_between_items_ms),
            max_retries: t.max_retries,
            retry_delay: Duration::from_millis(t.retry_delay_ms),
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        let r = &self.tumblr.rate_limit;
        RateLimitPolicy {
            max_retries: r.max_retries,
            base_delay: Duration::from_millis(r.base_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.request_timeout_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.tumblr.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("tumblr.api_key must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.tumblr.base_url).is_err() {
        return Err(ConfigError::Invalid("tumblr.base_url must be a valid URL"));
    }
    if cfg.tumblr.rate_limit.max_delay_ms < cfg.tumblr.rate_limit.base_delay_ms {
        return Err(ConfigError::Invalid(
            "tumblr.rate_limit.max_delay_ms must be >= base_delay_ms",
        ));
    }

    let ex = &cfg.extraction;
    if ex.target_count == 0 {
        return Err(ConfigError::Invalid("extraction.target_count must be > 0"));
    }
    if ex.page_limit == 0 || ex.page_limit > MAX_PAGE_LIMIT {
        return Err(ConfigError::Invalid("extraction.page_limit must be within 1..=20"));
    }
    if ex.max_iterations == 0 {
        return Err(ConfigError::Invalid("extraction.max_iterations must be > 0"));
    }
    if ex.max_items == 0 {
        return Err(ConfigError::Invalid("extraction.max_items must be > 0"));
    }

    if cfg.transfer.batch_size == 0 {
        return Err(ConfigError::Invalid("transfer.batch_size must be > 0"));
    }
    if cfg.transfer.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("transfer.request_timeout_secs must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

tumblr:
  api_key: "YOUR_TUMBLR_CONSUMER_KEY"
  base_url: "https://api.tumblr.com/"
  rate_limit:
    max_retries: 3
    base_delay_ms: 1000
    max_delay_ms: 60000

extraction:
  target_count: 50
  page_limit: 20
  max_iterations: 500
  max_items: 10000
  overshoot: keep_page

transfer:
  batch_size: 20
  delay_between_batches_ms: 1000
  delay_between_items_ms: 75
  max_retries: 3
  retry_delay_ms: 1000
  request_timeout_secs: 60
"#
}
