//! Output artifacts: raw telemetry listing and summary report.

pub mod generator;

pub use generator::{write_artifacts, Artifacts};
