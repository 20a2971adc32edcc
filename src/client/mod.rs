//! Client for the telemetry query endpoint.
//!
//! This module provides request signing, the wire transport and the
//! retrying executor that runs one batch at a time.

pub mod executor;
pub mod signer;
pub mod transport;

pub use executor::{Execution, RequestExecutor, RetryPolicy};
pub use signer::Signer;
pub use transport::{HttpTransport, QueryTransport};
