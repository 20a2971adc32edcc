//! Statistics over fetched telemetry.
//!
//! This module computes status distributions and power aggregates.
//! Everything here tolerates an empty input.

use crate::error::FailureKind;
use crate::models::{BatchFailure, PowerStats, TelemetryRecord};
use std::collections::BTreeMap;

/// Count devices per reported status.
pub fn status_counts(records: &[TelemetryRecord]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    for record in records {
        *counts.entry(record.status.to_string()).or_default() += 1;
    }

    counts
}

/// Sum, mean, max and min of the parseable power readings, in kW.
///
/// Returns `None` when no reading could be parsed.
pub fn power_stats(records: &[TelemetryRecord]) -> Option<PowerStats> {
    let readings: Vec<f64> = records.iter().filter_map(|r| r.power_kw()).collect();

    if readings.is_empty() {
        return None;
    }

    let total_kw: f64 = readings.iter().sum();
    let max_kw = readings.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_kw = readings.iter().copied().fold(f64::INFINITY, f64::min);

    Some(PowerStats {
        readings: readings.len(),
        total_kw,
        average_kw: total_kw / readings.len() as f64,
        max_kw,
        min_kw,
    })
}

/// Group failures by classification.
pub fn failures_by_kind(failures: &[BatchFailure]) -> BTreeMap<FailureKind, usize> {
    let mut grouped: BTreeMap<FailureKind, usize> = BTreeMap::new();

    for failure in failures {
        *grouped.entry(failure.kind).or_default() += 1;
    }

    grouped
}
