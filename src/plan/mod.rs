//! Batch planning: device identifier generation and batching.
//!
//! Both operations are pure. A failure here means the run cannot be
//! planned at all, so callers treat it as fatal.

use crate::error::{FetchError, Result};
use crate::models::{Batch, DeviceId};
use tracing::debug;

/// Settings for building the batch plan.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Prefix of every identifier (e.g. "SN-").
    pub prefix: String,
    /// Number of devices in the fleet.
    pub total_devices: usize,
    /// Zero-pad width of the numeric part.
    pub id_width: usize,
    /// Maximum identifiers per request.
    pub batch_size: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            prefix: "SN-".to_string(),
            total_devices: 500,
            id_width: 3,
            batch_size: 10,
        }
    }
}

impl From<&crate::config::FetchConfig> for PlanConfig {
    fn from(config: &crate::config::FetchConfig) -> Self {
        Self {
            prefix: config.id_prefix.clone(),
            total_devices: config.total_devices,
            id_width: config.id_width,
            batch_size: config.batch_size,
        }
    }
}

/// Generate `count` identifiers, `prefix` followed by the zero-padded index.
///
/// Fails if `width` cannot hold the largest index, since the identifiers
/// would then stop being fixed-width.
pub fn generate_device_ids(prefix: &str, count: usize, width: usize) -> Result<Vec<DeviceId>> {
    if width == 0 {
        return Err(FetchError::InvalidArgument(
            "identifier width must be at least 1".to_string(),
        ));
    }

    if let Some(largest) = count.checked_sub(1) {
        let digits = largest.to_string().len();
        if digits > width {
            return Err(FetchError::InvalidArgument(format!(
                "{} devices need {} digits but identifier width is {}",
                count, digits, width
            )));
        }
    }

    Ok((0..count)
        .map(|i| DeviceId::new(format!("{}{:0width$}", prefix, i, width = width)))
        .collect())
}

/// Split `ids` into consecutive batches of at most `batch_size`.
pub fn make_batches(ids: &[DeviceId], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(FetchError::InvalidArgument(
            "batch size must be at least 1".to_string(),
        ));
    }

    Ok(ids
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            devices: chunk.to_vec(),
        })
        .collect())
}

/// Build the full batch plan for a run.
pub fn build_plan(config: &PlanConfig) -> Result<Vec<Batch>> {
    let ids = generate_device_ids(&config.prefix, config.total_devices, config.id_width)?;
    let batches = make_batches(&ids, config.batch_size)?;

    debug!(
        "Planned {} batches for {} devices (batch size {})",
        batches.len(),
        ids.len(),
        config.batch_size
    );

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    fn sizes(batches: &[Batch]) -> Vec<usize> {
        batches.iter().map(|b| b.len()).collect()
    }

    #[test]
    fn test_generate_500() {
        let ids = generate_device_ids("SN-", 500, 3).unwrap();
        assert_eq!(ids.len(), 500);
        assert_eq!(ids[0].as_str(), "SN-000");
        assert_eq!(ids[42].as_str(), "SN-042");
        assert_eq!(ids[499].as_str(), "SN-499");

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn test_generate_edges() {
        assert!(generate_device_ids("SN-", 0, 3).unwrap().is_empty());
        assert_eq!(generate_device_ids("SN-", 1000, 3).unwrap().len(), 1000);
        assert!(matches!(
            generate_device_ids("SN-", 1001, 3),
            Err(FetchError::InvalidArgument(_))
        ));
        assert!(generate_device_ids("SN-", 5, 0).is_err());
    }

    #[test]
    fn test_batch_sizes() {
        let batches = make_batches(&generate_device_ids("SN-", 25, 3).unwrap(), 10).unwrap();
        assert_eq!(sizes(&batches), vec![10, 10, 5]);

        let batches = make_batches(&generate_device_ids("SN-", 30, 3).unwrap(), 10).unwrap();
        assert_eq!(sizes(&batches), vec![10, 10, 10]);

        let batches = make_batches(&generate_device_ids("SN-", 5, 3).unwrap(), 10).unwrap();
        assert_eq!(sizes(&batches), vec![5]);
    }

    #[test]
    fn test_batches_reproduce_input() {
        for n in [0usize, 1, 7, 10, 11, 99, 500] {
            for size in [1usize, 3, 10, 64] {
                let ids = generate_device_ids("SN-", n, 3).unwrap();
                let batches = make_batches(&ids, size).unwrap();

                assert_eq!(batches.len(), n.div_ceil(size));
                let flat: Vec<DeviceId> =
                    batches.iter().flat_map(|b| b.devices.clone()).collect();
                assert_eq!(flat, ids);

                for (i, batch) in batches.iter().enumerate() {
                    assert_eq!(batch.index, i);
                    assert!(!batch.is_empty());
                    if i + 1 < batches.len() {
                        assert_eq!(batch.len(), size);
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_batch_size() {
        let ids = generate_device_ids("SN-", 5, 3).unwrap();
        let err = assert_err!(make_batches(&ids, 0));
        assert!(matches!(err, FetchError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_plan_default() {
        let batches = assert_ok!(build_plan(&PlanConfig::default()));
        assert_eq!(batches.len(), 50);
        assert_eq!(batches[49].devices[9].as_str(), "SN-499");
    }
}
