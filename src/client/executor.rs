//! Retrying request executor.
//!
//! Runs one batch through the transport with a fresh signature per attempt.
//! Rate-limit and transient failures are retried after a constant delay
//! until the retry budget is spent; authentication and other client errors
//! end the batch immediately.

use crate::client::signer::Signer;
use crate::client::transport::QueryTransport;
use crate::error::FetchError;
use crate::models::{Batch, BatchFailure, RequestOutcome};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Bounded constant-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before every retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

/// What happened when one batch was executed.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: RequestOutcome,
    /// Attempts made, the first one included.
    pub attempts: u32,
    /// Time spent across all attempts and retry delays.
    pub elapsed: Duration,
}

/// Executes batches against a transport.
pub struct RequestExecutor<T> {
    transport: T,
    signer: Signer,
    policy: RetryPolicy,
}

impl<T: QueryTransport> RequestExecutor<T> {
    pub fn new(transport: T, signer: Signer, policy: RetryPolicy) -> Self {
        Self {
            transport,
            signer,
            policy,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one batch to a terminal outcome.
    pub async fn execute(&self, batch: &Batch) -> Execution {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let auth = self.signer.sign_now();
            debug!(
                "Batch {} attempt {} ({} devices, {})",
                batch.index,
                attempt,
                batch.len(),
                batch.span()
            );

            let error = match self.transport.query(&batch.devices, &auth).await {
                Ok(records) => {
                    return Execution {
                        outcome: RequestOutcome::Success {
                            batch: batch.clone(),
                            records,
                        },
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    };
                }
                Err(e) => e,
            };

            if error.is_recoverable() && attempt <= self.policy.max_retries {
                warn!(
                    "Batch {} attempt {} failed: {}. Retrying in {}ms ({}/{})",
                    batch.index,
                    attempt,
                    error,
                    self.policy.retry_delay.as_millis(),
                    attempt,
                    self.policy.max_retries
                );
                sleep(self.policy.retry_delay).await;
                continue;
            }

            let error = if error.is_recoverable() {
                FetchError::RetryBudgetExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                }
            } else {
                error
            };

            warn!("Batch {} failed: {}", batch.index, error);

            return Execution {
                outcome: RequestOutcome::Failure(BatchFailure {
                    batch: batch.clone(),
                    kind: error.failure_kind(),
                    attempts: attempt,
                    message: error.to_string(),
                }),
                attempts: attempt,
                elapsed: started.elapsed(),
            };
        }
    }
}
