//! Fetch orchestration and statistics.
//!
//! The aggregator drives the paced fetch loop; `stats` computes the
//! status and power figures that go into the summary.

pub mod aggregator;
pub mod stats;

pub use aggregator::{Aggregator, AggregatorOptions, StopHandle, StopSignal};
