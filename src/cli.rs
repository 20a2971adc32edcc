//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Every fetch setting is optional here so
//! that an unset flag leaves the config file value alone.

use clap::Parser;
use std::path::PathBuf;

/// FleetFetch - rate-limited telemetry fetcher for device fleets
///
/// Pulls telemetry for every device in the fleet from a signed query
/// endpoint, one batch per rate-limit window, retrying rate-limit and
/// transient errors. Writes a raw JSON listing and a summary report.
///
/// Examples:
///   fleetfetch --secret interview_token_123
///   fleetfetch --base-url http://localhost:3000 --devices 500 --batch-size 10
///   fleetfetch --dry-run --devices 25
///   fleetfetch --format json --output-dir ./out --deadline 120
///   fleetfetch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .fleetfetch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Endpoint base URL (scheme, host, port)
    #[arg(long, value_name = "URL", env = "FLEETFETCH_BASE_URL")]
    pub base_url: Option<String>,

    /// Endpoint path; also signed as part of every request
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Shared secret used to sign requests
    #[arg(long, value_name = "SECRET", env = "FLEETFETCH_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Number of devices in the fleet
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub devices: Option<usize>,

    /// Maximum device identifiers per request
    #[arg(short, long, value_name = "SIZE")]
    pub batch_size: Option<usize>,

    /// Minimum milliseconds between request starts
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Retries per batch on rate-limit or transient errors
    #[arg(long, value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Constant delay before each retry, in milliseconds
    #[arg(long, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,

    /// Directory for the telemetry listing and summary report
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Summary report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Stop after this many seconds, keeping what was fetched
    ///
    /// The run stops at the next batch boundary; the partial result is
    /// still written and the exit code is 2.
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: print the batch plan without calling the endpoint
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .fleetfetch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the summary report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref base_url) = self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref path) = self.path {
            if !path.starts_with('/') {
                return Err("Endpoint path must start with '/'".to_string());
            }
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.interval_ms == Some(0) {
            return Err("Interval must be at least 1 millisecond".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.deadline == Some(0) {
            return Err("Deadline must be at least 1 second".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
