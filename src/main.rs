//! FleetFetch - rate-limited telemetry fetcher for device fleets
//!
//! A CLI tool that pulls telemetry for a fixed fleet of devices from a
//! signed query endpoint, one batch per rate-limit window, and writes a
//! raw listing plus a summary report.
//!
//! Exit codes:
//!   0 - Success (every device fetched, no terminal failures)
//!   1 - Runtime error (configuration, batch plan, output I/O)
//!   2 - Partial failure (at least one failed batch, or stopped early)

mod analysis;
mod cli;
mod client;
mod config;
mod error;
mod models;
mod plan;
mod report;

use analysis::{Aggregator, AggregatorOptions, StopHandle, StopSignal};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use client::{HttpTransport, RequestExecutor, Signer};
use config::{Config, CONFIG_FILE_NAME};
use models::{AggregateResult, Batch, ReportMetadata, SummaryReport};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args)?;

    info!("FleetFetch v{}", env!("CARGO_PKG_VERSION"));

    match run_fetch(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Fetch failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .fleetfetch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Set [endpoint].secret (or FLEETFETCH_SECRET) before running.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` takes precedence over `--verbose`/`--quiet` when set.
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level().as_str().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the complete fetch workflow. Returns exit code (0 or 2).
async fn run_fetch(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    debug!("Configuration: {:?}", config);

    // Step 1: Build the batch plan; failure here is fatal
    config.validate_plan()?;
    let batches = plan::build_plan(&plan::PlanConfig::from(&config.fetch))
        .context("Failed to build batch plan")?;

    if args.dry_run {
        return handle_dry_run(&config, &batches);
    }

    config.validate()?;

    // Step 2: Wire up the client
    let endpoint = config.endpoint.url();
    println!("📡 Fetching telemetry");
    println!("   Endpoint: {}", endpoint);
    println!(
        "   Devices: {} in {} batches of up to {}",
        config.fetch.total_devices,
        batches.len(),
        config.fetch.batch_size
    );
    println!(
        "   Rate limit: 1 request / {}ms, {} retries at {}ms",
        config.fetch.rate_limit_interval_ms, config.fetch.max_retries, config.fetch.retry_delay_ms
    );

    let transport = HttpTransport::new(endpoint.clone(), config.endpoint.timeout())?;
    let signer = Signer::new(&config.endpoint.path, &config.endpoint.secret);
    let executor = RequestExecutor::new(transport, signer, config.fetch.retry_policy());

    let (stop_handle, stop_signal) = StopSignal::new();
    spawn_stop_triggers(stop_handle, args.deadline);

    // Step 3: Run the paced fetch loop
    let options = AggregatorOptions {
        rate_limit_interval: config.fetch.rate_limit_interval(),
        show_progress: !args.quiet,
    };
    let result = Aggregator::new(&executor, options, stop_signal)
        .run(&batches)
        .await;

    // Step 4: Persist the artifacts
    let report = SummaryReport {
        metadata: ReportMetadata {
            endpoint,
            generated_at: Utc::now(),
            total_devices: config.fetch.total_devices,
            batch_size: config.fetch.batch_size,
            rate_limit_interval_ms: config.fetch.rate_limit_interval_ms,
            max_retries: config.fetch.max_retries,
            retry_delay_ms: config.fetch.retry_delay_ms,
        },
        summary: result.summary.clone(),
        failures: result.failures.clone(),
        unreturned: result.unreturned.clone(),
    };

    let artifacts = report::write_artifacts(&result.records, &report, &config.output, args.format)?;

    print_summary(&result);
    println!("\n✅ Telemetry saved to: {}", artifacts.raw.display());
    println!("   Summary saved to: {}", artifacts.summary.display());

    if result.is_complete() {
        Ok(0)
    } else {
        eprintln!(
            "\n⛔ {} devices were not fetched. Failing (exit code 2).",
            config
                .fetch
                .total_devices
                .saturating_sub(result.summary.fetched_devices)
        );

        let missing = result.missing_devices();
        if !missing.is_empty() {
            let ids: Vec<&str> = missing.iter().map(|d| d.as_str()).collect();
            eprintln!("   Missing: {}", ids.join(", "));
        }
        Ok(2)
    }
}

/// Stop the fetch loop on Ctrl-C or when the deadline passes.
///
/// A second Ctrl-C exits immediately.
fn spawn_stop_triggers(handle: StopHandle, deadline: Option<u64>) {
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current batch (Ctrl-C again to abort)");
            interrupt.stop();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    if let Some(secs) = deadline {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("Deadline of {}s reached; stopping after the current batch", secs);
            handle.stop();
        });
    }
}

/// Handle --dry-run: print the batch plan, exit.
fn handle_dry_run(config: &Config, batches: &[Batch]) -> Result<i32> {
    println!("\n🔍 Dry run: batch plan (no requests sent)...\n");

    if batches.is_empty() {
        println!("   No devices to fetch.");
    } else {
        for batch in batches {
            println!("     📦 Batch {:>3}: {} ({} devices)", batch.index, batch.span(), batch.len());
        }

        let minimum = config
            .fetch
            .rate_limit_interval()
            .saturating_mul(batches.len().saturating_sub(1) as u32);
        println!(
            "\n   Total: {} devices in {} batches, at least {:.1}s",
            config.fetch.total_devices,
            batches.len(),
            minimum.as_secs_f64()
        );
    }

    println!("\n✅ Dry run complete. No requests were made.");
    Ok(0)
}

/// Print the console summary.
fn print_summary(result: &AggregateResult) {
    let summary = &result.summary;

    println!("\n📊 Fetch Summary:");
    println!(
        "   Fetched: {}/{} devices",
        summary.fetched_devices, summary.requested_devices
    );
    println!(
        "   Batches: {}/{} processed, {} failed, {} attempts",
        summary.processed_batches, summary.total_batches, summary.failed_batches, summary.total_attempts
    );
    println!(
        "   Duration: {:.1}s ({:.2}s per batch)",
        summary.elapsed_seconds, summary.average_batch_seconds
    );

    if !summary.status_counts.is_empty() {
        let statuses: Vec<String> = summary
            .status_counts
            .iter()
            .map(|(status, count)| format!("{}: {}", status, count))
            .collect();
        println!("   Status: {}", statuses.join(" | "));
    }

    if let Some(ref power) = summary.power {
        println!(
            "   Power: total {:.2} kW | avg {:.2} kW | max {:.2} kW | min {:.2} kW",
            power.total_kw, power.average_kw, power.max_kw, power.min_kw
        );
    }

    for failure in &result.failures {
        println!(
            "   ⚠️  Batch {} ({}): {} after {} attempts",
            failure.batch.index,
            failure.batch.span(),
            failure.kind,
            failure.attempts
        );
    }

    if summary.unreturned_devices > 0 {
        println!(
            "   ⚠️  {} requested devices missing from successful responses",
            summary.unreturned_devices
        );
    }

    if summary.cancelled {
        println!("   ⏹️  Stopped early; remaining batches were not attempted");
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
