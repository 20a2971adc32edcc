//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.fleetfetch.toml` files. The resulting `Config` is built once at
//! start-up and passed by reference; nothing changes it mid-run.

use crate::client::RetryPolicy;
use crate::error::FetchError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".fleetfetch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Query endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Fleet, batching, pacing and retry settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Output artifact settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Query endpoint settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Scheme, host and port, e.g. `http://localhost:3000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Endpoint path. Also the first component of the signature.
    #[serde(default = "default_path")]
    pub path: String,

    /// Shared secret used for signing.
    #[serde(default)]
    pub secret: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            path: default_path(),
            secret: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("secret", &if self.secret.is_empty() { "<unset>" } else { "<redacted>" })
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl EndpointConfig {
    /// Full URL of the query endpoint.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_path() -> String {
    "/device/real/query".to_string()
}

fn default_timeout() -> u64 {
    10
}

/// Fleet, batching, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Number of devices in the fleet.
    #[serde(default = "default_total_devices")]
    pub total_devices: usize,

    /// Identifier prefix.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    /// Zero-pad width of the identifier index.
    #[serde(default = "default_id_width")]
    pub id_width: usize,

    /// Maximum identifiers per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum spacing between request starts, in milliseconds.
    #[serde(default = "default_rate_limit_interval_ms")]
    pub rate_limit_interval_ms: u64,

    /// Retries after the first attempt on rate-limit or transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Constant delay before each retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            total_devices: default_total_devices(),
            id_prefix: default_id_prefix(),
            id_width: default_id_width(),
            batch_size: default_batch_size(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl FetchConfig {
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

fn default_total_devices() -> usize {
    500
}

fn default_id_prefix() -> String {
    "SN-".to_string()
}

fn default_id_width() -> usize {
    3
}

fn default_batch_size() -> usize {
    10
}

fn default_rate_limit_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

/// Output artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for all artifacts.
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,

    /// Raw telemetry listing (JSON).
    #[serde(default = "default_raw_file")]
    pub raw_file: String,

    /// Summary report file name, without extension.
    #[serde(default = "default_summary_file")]
    pub summary_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            raw_file: default_raw_file(),
            summary_file: default_summary_file(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_raw_file() -> String {
    "telemetry.json".to_string()
}

fn default_summary_file() -> String {
    "summary".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when explicitly given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref base_url) = args.base_url {
            self.endpoint.base_url = base_url.clone();
        }
        if let Some(ref path) = args.path {
            self.endpoint.path = path.clone();
        }
        if let Some(ref secret) = args.secret {
            self.endpoint.secret = secret.clone();
        }
        if let Some(timeout) = args.timeout {
            self.endpoint.timeout_seconds = timeout;
        }

        if let Some(devices) = args.devices {
            self.fetch.total_devices = devices;
        }
        if let Some(batch_size) = args.batch_size {
            self.fetch.batch_size = batch_size;
        }
        if let Some(interval) = args.interval_ms {
            self.fetch.rate_limit_interval_ms = interval;
        }
        if let Some(retries) = args.max_retries {
            self.fetch.max_retries = retries;
        }
        if let Some(delay) = args.retry_delay_ms {
            self.fetch.retry_delay_ms = delay;
        }

        if let Some(ref dir) = args.output_dir {
            self.output.directory = dir.clone();
        }
    }

    /// Check the settings needed to build the batch plan.
    pub fn validate_plan(&self) -> std::result::Result<(), FetchError> {
        if self.fetch.batch_size == 0 {
            return Err(FetchError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.fetch.id_width == 0 {
            return Err(FetchError::InvalidArgument(
                "id_width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check everything needed for a real run.
    pub fn validate(&self) -> std::result::Result<(), FetchError> {
        self.validate_plan()?;

        let base_url = &self.endpoint.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(FetchError::InvalidArgument(format!(
                "base_url must start with 'http://' or 'https://': {}",
                base_url
            )));
        }
        if !self.endpoint.path.starts_with('/') {
            return Err(FetchError::InvalidArgument(format!(
                "path must start with '/': {}",
                self.endpoint.path
            )));
        }
        if self.endpoint.secret.is_empty() {
            return Err(FetchError::InvalidArgument(
                "secret is not set (use --secret, FLEETFETCH_SECRET or [endpoint].secret)"
                    .to_string(),
            ));
        }
        if self.endpoint.timeout_seconds == 0 {
            return Err(FetchError::InvalidArgument(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.fetch.rate_limit_interval_ms == 0 {
            return Err(FetchError::InvalidArgument(
                "rate_limit_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
