//! Data models for the telemetry fetcher.
//!
//! This module contains the core data structures used throughout
//! the application: device identifiers, batches, telemetry records,
//! per-batch outcomes and the aggregated result.

use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Opaque identifier of one device (e.g. `SN-042`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A group of device identifiers sent in one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based position of the batch in the plan.
    pub index: usize,
    /// Identifiers in request order.
    pub devices: Vec<DeviceId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// First and last identifier, for log lines.
    pub fn span(&self) -> String {
        match (self.devices.first(), self.devices.last()) {
            (Some(first), Some(last)) if first != last => format!("{}..{}", first, last),
            (Some(first), _) => first.to_string(),
            _ => "<empty>".to_string(),
        }
    }
}

/// Reported online/offline state of a device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceStatus {
    Online,
    Offline,
    Other(String),
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Other("Unknown".to_string())
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "Online"),
            DeviceStatus::Offline => write!(f, "Offline"),
            DeviceStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for DeviceStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "online" => DeviceStatus::Online,
            "offline" => DeviceStatus::Offline,
            _ => DeviceStatus::Other(s.trim().to_string()),
        }
    }
}

impl From<String> for DeviceStatus {
    fn from(s: String) -> Self {
        DeviceStatus::from(s.as_str())
    }
}

impl From<DeviceStatus> for String {
    fn from(status: DeviceStatus) -> Self {
        status.to_string()
    }
}

/// Accept any JSON value for a status. Null or missing maps to the
/// default, other non-strings are kept verbatim as `Other`.
fn lenient_status<'de, D>(deserializer: D) -> Result<DeviceStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => DeviceStatus::default(),
        Some(Value::String(s)) => DeviceStatus::from(s),
        Some(other) => DeviceStatus::Other(other.to_string()),
    })
}

/// One device's reported state, as returned by the endpoint.
///
/// Only `status` and `power` are interpreted, and neither can fail
/// decoding of a record. Unknown fields are kept in `extra` so the raw
/// listing reproduces what the endpoint sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Device identifier. Empty when the endpoint omitted it.
    #[serde(default)]
    pub sn: DeviceId,
    /// Power reading with units, usually a string such as `"2.5 kW"`.
    #[serde(default)]
    pub power: Value,
    /// Online/offline status.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: DeviceStatus,
    /// Endpoint-supplied timestamp of the last update.
    #[serde(default)]
    pub last_updated: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryRecord {
    /// Power reading normalized to kilowatts, if it can be parsed.
    ///
    /// Bare numbers are taken as kilowatts.
    pub fn power_kw(&self) -> Option<f64> {
        match &self.power {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_power_kw(s),
            _ => None,
        }
    }
}

/// Parse a reading like `"2.5 kW"`, `"2500W"` or `"1.1 MW"` into kilowatts.
pub fn parse_power_kw(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.trim().parse().ok()?;

    // Case matters: "mW" and "MW" differ by nine orders of magnitude.
    let factor = match unit.trim() {
        "" | "kW" | "KW" | "kw" => 1.0,
        "W" | "w" => 1e-3,
        "MW" => 1e3,
        "mW" => 1e-6,
        _ => return None,
    };

    if value.is_finite() {
        Some(value * factor)
    } else {
        None
    }
}

/// A batch that ended in a terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// The originating batch, so it can be re-run.
    pub batch: Batch,
    /// Classification of the failure.
    pub kind: FailureKind,
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// Final error message.
    pub message: String,
}

/// Result of running one batch through the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success {
        batch: Batch,
        records: Vec<TelemetryRecord>,
    },
    Failure(BatchFailure),
}

impl RequestOutcome {
    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }
}

/// Power aggregates across all fetched records, in kilowatts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerStats {
    /// Number of records whose power reading could be parsed.
    pub readings: usize,
    pub total_kw: f64,
    pub average_kw: f64,
    pub max_kw: f64,
    pub min_kw: f64,
}

/// Summary counters for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchSummary {
    /// Devices across all processed batches.
    pub requested_devices: usize,
    /// Records successfully retrieved.
    pub fetched_devices: usize,
    /// Batches that ended in a terminal failure.
    pub failed_batches: usize,
    /// Devices inside failed batches.
    pub failed_devices: usize,
    /// Batches in the plan.
    pub total_batches: usize,
    /// Batches actually attempted before the run ended.
    pub processed_batches: usize,
    /// Network attempts, retries included.
    pub total_attempts: u32,
    /// Successful batches whose record count differed from the request.
    pub mismatched_batches: usize,
    /// Requested devices absent from their batch's successful response.
    pub unreturned_devices: usize,
    /// Wall-clock time for the whole run.
    pub elapsed_seconds: f64,
    /// `elapsed_seconds / processed_batches`, zero when nothing ran.
    pub average_batch_seconds: f64,
    /// Whether the run was stopped before the last batch.
    pub cancelled: bool,
    /// Device count per reported status.
    pub status_counts: BTreeMap<String, usize>,
    /// Absent when no power reading was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerStats>,
}

/// Everything collected by one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    /// Successful records in batch order.
    pub records: Vec<TelemetryRecord>,
    /// Terminal failures in batch order.
    pub failures: Vec<BatchFailure>,
    /// Requested identifiers that a successful response left out.
    pub unreturned: Vec<DeviceId>,
    pub summary: FetchSummary,
}

impl AggregateResult {
    /// True when every planned batch ran, none failed, and every
    /// requested device came back.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.unreturned.is_empty() && !self.summary.cancelled
    }

    /// Identifiers with no record, suitable for a targeted re-run.
    ///
    /// Covers devices in failed batches and devices a successful response
    /// left out, sorted and without duplicates.
    pub fn missing_devices(&self) -> Vec<DeviceId> {
        let mut missing: Vec<DeviceId> = self
            .failures
            .iter()
            .flat_map(|f| f.batch.devices.iter().cloned())
            .chain(self.unreturned.iter().cloned())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Requested identifiers that do not appear in `records`.
pub fn unreturned_devices(batch: &Batch, records: &[TelemetryRecord]) -> Vec<DeviceId> {
    let returned: HashSet<&DeviceId> = records.iter().map(|r| &r.sn).collect();
    batch
        .devices
        .iter()
        .filter(|id| !returned.contains(id))
        .cloned()
        .collect()
}

/// Metadata about the run that produced a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Full endpoint URL queried.
    pub endpoint: String,
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    pub total_devices: usize,
    pub batch_size: usize,
    pub rate_limit_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// The summary report written after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub metadata: ReportMetadata,
    pub summary: FetchSummary,
    /// Every terminal failure with its batch's identifiers.
    pub failures: Vec<BatchFailure>,
    /// Devices left out of otherwise successful responses.
    #[serde(default)]
    pub unreturned: Vec<DeviceId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_from_str() {
        assert_eq!(DeviceStatus::from("Online"), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from("OFFLINE"), DeviceStatus::Offline);
        assert_eq!(
            DeviceStatus::from("Maintenance"),
            DeviceStatus::Other("Maintenance".to_string())
        );
    }

    #[test]
    fn test_parse_power_units() {
        assert_eq!(parse_power_kw("2.5 kW"), Some(2.5));
        assert_eq!(parse_power_kw("2500W"), Some(2.5));
        assert_eq!(parse_power_kw("1.5 MW"), Some(1500.0));
        assert_eq!(parse_power_kw("3"), Some(3.0));
        assert_eq!(parse_power_kw("n/a"), None);
        assert_eq!(parse_power_kw("4 furlongs"), None);
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let raw = json!({
            "sn": "SN-007",
            "power": "1.25 kW",
            "status": "Online",
            "last_updated": "2024-01-01T00:00:00Z",
            "firmware": "v2"
        });

        let record: TelemetryRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.sn.as_str(), "SN-007");
        assert_eq!(record.status, DeviceStatus::Online);
        assert_eq!(record.power_kw(), Some(1.25));
        assert_eq!(record.extra.get("firmware"), Some(&json!("v2")));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["status"], json!("Online"));
        assert_eq!(back["firmware"], json!("v2"));
    }

    #[test]
    fn test_record_missing_status_is_unknown() {
        let record: TelemetryRecord =
            serde_json::from_value(json!({"sn": "SN-001", "power": 2.0})).unwrap();
        assert_eq!(record.status.to_string(), "Unknown");
        assert_eq!(record.power_kw(), Some(2.0));
    }

    #[test]
    fn test_record_tolerates_odd_status_and_missing_sn() {
        let record: TelemetryRecord =
            serde_json::from_value(json!({"sn": "SN-002", "status": null})).unwrap();
        assert_eq!(record.status, DeviceStatus::default());

        let record: TelemetryRecord =
            serde_json::from_value(json!({"sn": "SN-003", "status": 1})).unwrap();
        assert_eq!(record.status, DeviceStatus::Other("1".to_string()));

        let record: TelemetryRecord =
            serde_json::from_value(json!({"power": "1 kW", "status": "Online"})).unwrap();
        assert_eq!(record.sn.as_str(), "");
        assert_eq!(record.status, DeviceStatus::Online);
    }

    #[test]
    fn test_unreturned_devices() {
        let batch = Batch {
            index: 0,
            devices: vec!["SN-000".into(), "SN-001".into(), "SN-002".into()],
        };
        let records: Vec<TelemetryRecord> = ["SN-001", "SN-999"]
            .iter()
            .map(|sn| serde_json::from_value(json!({ "sn": sn })).unwrap())
            .collect();

        assert_eq!(
            unreturned_devices(&batch, &records),
            vec![DeviceId::from("SN-000"), DeviceId::from("SN-002")]
        );
    }

    #[test]
    fn test_batch_span() {
        let batch = Batch {
            index: 0,
            devices: vec!["SN-000".into(), "SN-009".into()],
        };
        assert_eq!(batch.span(), "SN-000..SN-009");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_missing_devices() {
        let result = AggregateResult {
            failures: vec![BatchFailure {
                batch: Batch {
                    index: 3,
                    devices: vec!["SN-030".into(), "SN-031".into()],
                },
                kind: FailureKind::AuthenticationFailure,
                attempts: 1,
                message: "bad signature".to_string(),
            }],
            ..Default::default()
        };

        assert!(!result.is_complete());
        assert_eq!(
            result.missing_devices(),
            vec![DeviceId::from("SN-030"), DeviceId::from("SN-031")]
        );
    }

    #[test]
    fn test_unreturned_devices_make_result_incomplete() {
        let result = AggregateResult {
            unreturned: vec!["SN-041".into(), "SN-040".into()],
            ..Default::default()
        };

        assert!(!result.is_complete());
        assert_eq!(
            result.missing_devices(),
            vec![DeviceId::from("SN-040"), DeviceId::from("SN-041")]
        );
    }
}
