//! Report generation.
//!
//! This module renders the raw telemetry listing and the summary report
//! (Markdown or JSON) and writes them to the output directory.

use crate::analysis::stats::failures_by_kind;
use crate::cli::OutputFormat;
use crate::config::OutputConfig;
use crate::models::{
    BatchFailure, DeviceId, FetchSummary, ReportMetadata, SummaryReport, TelemetryRecord,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths of the artifacts written for one run.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub raw: PathBuf,
    pub summary: PathBuf,
}

/// Generate a complete Markdown summary report.
pub fn generate_markdown_report(report: &SummaryReport) -> String {
    let mut output = String::new();

    output.push_str("# FleetFetch Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_status_section(&report.summary));
    output.push_str(&generate_power_section(&report.summary));
    output.push_str(&generate_failures_section(&report.failures));
    output.push_str(&generate_unreturned_section(&report.unreturned));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Endpoint:** `{}`\n", metadata.endpoint));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Fleet Size:** {}\n", metadata.total_devices));
    section.push_str(&format!("- **Batch Size:** {}\n", metadata.batch_size));
    section.push_str(&format!(
        "- **Rate Limit:** 1 request / {}ms\n",
        metadata.rate_limit_interval_ms
    ));
    section.push_str(&format!(
        "- **Retry Policy:** {} retries, {}ms constant delay\n",
        metadata.max_retries, metadata.retry_delay_ms
    ));
    section.push('\n');

    section
}

/// Generate the counters section.
fn generate_summary_section(summary: &FetchSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Requested | Fetched | Failed Batches | Failed Devices | Attempts |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.requested_devices,
        summary.fetched_devices,
        summary.failed_batches,
        summary.failed_devices,
        summary.total_attempts
    ));

    section.push_str(&format!(
        "- **Batches:** {}/{} processed\n",
        summary.processed_batches, summary.total_batches
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s ({:.2}s per batch)\n",
        summary.elapsed_seconds, summary.average_batch_seconds
    ));
    if summary.mismatched_batches > 0 {
        section.push_str(&format!(
            "- **Record count mismatches:** {} batches\n",
            summary.mismatched_batches
        ));
    }
    if summary.cancelled {
        section.push_str("- **Stopped early:** remaining batches were not attempted\n");
    }
    section.push('\n');

    section
}

/// Generate the device status table.
fn generate_status_section(summary: &FetchSummary) -> String {
    let mut section = String::new();

    section.push_str("## Device Status\n\n");

    if summary.status_counts.is_empty() {
        section.push_str("No telemetry was fetched.\n\n");
        return section;
    }

    section.push_str("| Status | Devices |\n");
    section.push_str("|:---|:---:|\n");

    let mut statuses: Vec<_> = summary.status_counts.iter().collect();
    statuses.sort_by_key(|(_, count)| std::cmp::Reverse(**count));

    for (status, count) in statuses {
        section.push_str(&format!("| {} | {} |\n", status, count));
    }
    section.push('\n');

    section
}

/// Generate the power aggregates table.
fn generate_power_section(summary: &FetchSummary) -> String {
    let Some(ref power) = summary.power else {
        return String::new();
    };

    let mut section = String::new();

    section.push_str("## Power\n\n");
    section.push_str("| Readings | Total | Average | Max | Min |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {:.2} kW | {:.2} kW | {:.2} kW | {:.2} kW |\n\n",
        power.readings, power.total_kw, power.average_kw, power.max_kw, power.min_kw
    ));

    section
}

/// Generate the failures section, listing every failed batch's devices.
fn generate_failures_section(failures: &[BatchFailure]) -> String {
    let mut section = String::new();

    section.push_str("## Failures\n\n");

    if failures.is_empty() {
        section.push_str("All batches succeeded.\n\n");
        return section;
    }

    for (kind, count) in failures_by_kind(failures) {
        section.push_str(&format!("- {}: {}\n", kind, count));
    }
    section.push('\n');

    section.push_str("| Batch | Kind | Attempts | Devices | Error |\n");
    section.push_str("|:---:|:---|:---:|:---|:---|\n");

    for failure in failures {
        let devices: Vec<&str> = failure.batch.devices.iter().map(|d| d.as_str()).collect();
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            failure.batch.index,
            failure.kind,
            failure.attempts,
            devices.join(", "),
            failure.message.replace('|', "\\|")
        ));
    }
    section.push('\n');

    section
}

/// List devices a successful response did not include.
fn generate_unreturned_section(unreturned: &[DeviceId]) -> String {
    if unreturned.is_empty() {
        return String::new();
    }

    let ids: Vec<&str> = unreturned.iter().map(|d| d.as_str()).collect();
    format!(
        "## Missing From Responses\n\n{} devices were requested but not returned: {}\n\n",
        unreturned.len(),
        ids.join(", ")
    )
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by FleetFetch*\n".to_string()
}

/// Generate a JSON summary report.
pub fn generate_json_report(report: &SummaryReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Generate the raw telemetry listing.
pub fn generate_raw_listing(records: &[TelemetryRecord]) -> Result<String> {
    serde_json::to_string_pretty(records).map_err(Into::into)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write the raw listing and the summary report into the output directory.
pub fn write_artifacts(
    records: &[TelemetryRecord],
    report: &SummaryReport,
    output: &OutputConfig,
    format: OutputFormat,
) -> Result<Artifacts> {
    std::fs::create_dir_all(&output.directory).with_context(|| {
        format!(
            "Failed to create output directory {}",
            output.directory.display()
        )
    })?;

    let raw = output.directory.join(&output.raw_file);
    write_file(&raw, &generate_raw_listing(records)?)?;

    let summary = output
        .directory
        .join(format!("{}.{}", output.summary_file, format.extension()));
    let content = match format {
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report),
    };
    write_file(&summary, &content)?;

    info!(
        "Wrote {} records to {} and summary to {}",
        records.len(),
        raw.display(),
        summary.display()
    );

    Ok(Artifacts { raw, summary })
}
