//! Error types for fetching telemetry.
//!
//! `FetchError` covers everything that can go wrong between building the
//! batch plan and receiving a response for one batch. Application plumbing
//! (config files, report output) uses `anyhow` instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for fetch operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Malformed input to the generator, batcher or configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The endpoint refused the request because the rate limit was hit.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The endpoint rejected the signature or secret.
    #[error("Authentication failed (HTTP {status}): {body}")]
    AuthenticationFailure { status: u16, body: String },

    /// Server-side or network-level error.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Any other client error; the request itself is wrong.
    #[error("Request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// A recoverable error kept recurring until the retry budget ran out.
    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FetchError::RateLimitExceeded | FetchError::Transient(_))
    }

    /// Classification used when this error ends a batch.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimitExceeded => FailureKind::RateLimitExhausted,
            FetchError::Transient(_) => FailureKind::TransientExhausted,
            FetchError::AuthenticationFailure { .. } => FailureKind::AuthenticationFailure,
            FetchError::Rejected { .. } | FetchError::InvalidArgument(_) => FailureKind::Rejected,
            FetchError::RetryBudgetExhausted { last, .. } => last.failure_kind(),
        }
    }
}

/// Why a batch ended in a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimitExhausted,
    AuthenticationFailure,
    TransientExhausted,
    Rejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::RateLimitExhausted => write!(f, "Rate limit (retries exhausted)"),
            FailureKind::AuthenticationFailure => write!(f, "Authentication failure"),
            FailureKind::TransientExhausted => write!(f, "Transient error (retries exhausted)"),
            FailureKind::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;
