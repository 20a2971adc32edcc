//! Sequential, paced fetch loop.
//!
//! The aggregator runs every batch through the executor strictly in order,
//! one request in flight at a time. Between batches it sleeps for whatever
//! is left of the rate-limit interval, measured from the start of the
//! previous request, so consecutive request starts are never closer than
//! the interval. A [`StopSignal`] is checked at every batch boundary.

use crate::analysis::stats::{power_stats, status_counts};
use crate::client::{QueryTransport, RequestExecutor};
use crate::models::{unreturned_devices, AggregateResult, Batch, FetchSummary, RequestOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Cooperative stop request, observed between batches.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Sending side of a [`StopSignal`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl StopSignal {
    pub fn new() -> (StopHandle, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> StopSignal {
        let (_tx, rx) = watch::channel(false);
        StopSignal { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested; pends forever otherwise.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Options for the fetch loop.
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Minimum spacing between the starts of consecutive requests.
    pub rate_limit_interval: Duration,
    /// Whether to draw a progress bar.
    pub show_progress: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            rate_limit_interval: Duration::from_millis(1000),
            show_progress: true,
        }
    }
}

/// Drives the executor over a batch plan and accumulates the result.
pub struct Aggregator<'a, T> {
    executor: &'a RequestExecutor<T>,
    options: AggregatorOptions,
    stop: StopSignal,
}

impl<'a, T: QueryTransport> Aggregator<'a, T> {
    pub fn new(executor: &'a RequestExecutor<T>, options: AggregatorOptions, stop: StopSignal) -> Self {
        Self {
            executor,
            options,
            stop,
        }
    }

    /// Process every batch in order and return what was collected.
    ///
    /// Batch failures never abort the run. If the stop signal fires, the
    /// result holds everything gathered up to that point.
    pub async fn run(&mut self, batches: &[Batch]) -> AggregateResult {
        info!(
            "Fetching {} batches at one request per {}ms",
            batches.len(),
            self.options.rate_limit_interval.as_millis()
        );

        let run_started = Instant::now();
        let progress = self.progress_bar(batches.len());

        let mut result = AggregateResult::default();
        let mut requested_devices: usize = 0;
        let mut processed_batches: usize = 0;
        let mut total_attempts: u32 = 0;
        let mut mismatched_batches: usize = 0;
        let mut cancelled = false;

        for (position, batch) in batches.iter().enumerate() {
            if self.stop.is_stopped() {
                warn!("Stop requested; skipping remaining {} batches", batches.len() - position);
                cancelled = true;
                break;
            }

            let execution = self.executor.execute(batch).await;
            processed_batches += 1;
            requested_devices += batch.len();
            total_attempts += execution.attempts;

            match execution.outcome {
                RequestOutcome::Success { batch, records } => {
                    if records.len() != batch.len() {
                        warn!(
                            "Batch {} returned {} records for {} devices",
                            batch.index,
                            records.len(),
                            batch.len()
                        );
                        mismatched_batches += 1;
                    }

                    let unreturned = unreturned_devices(&batch, &records);
                    if !unreturned.is_empty() {
                        warn!(
                            "Batch {} response left out {} requested devices",
                            batch.index,
                            unreturned.len()
                        );
                        result.unreturned.extend(unreturned);
                    }
                    result.records.extend(records);
                }
                RequestOutcome::Failure(failure) => {
                    progress.println(format!(
                        "Batch {} ({}) failed: {}",
                        failure.batch.index,
                        failure.batch.span(),
                        failure.kind
                    ));
                    result.failures.push(failure);
                }
            }

            progress.inc(1);

            if position + 1 == batches.len() {
                break;
            }

            let wait = self
                .options
                .rate_limit_interval
                .saturating_sub(execution.elapsed);
            if wait.is_zero() {
                continue;
            }

            debug!("Pacing: waiting {}ms before next batch", wait.as_millis());
            tokio::select! {
                _ = sleep(wait) => {}
                _ = self.stop.stopped() => {
                    warn!(
                        "Stop requested; skipping remaining {} batches",
                        batches.len() - position - 1
                    );
                    cancelled = true;
                    break;
                }
            }
        }

        progress.finish_and_clear();

        let elapsed = run_started.elapsed().as_secs_f64();
        result.summary = FetchSummary {
            requested_devices,
            fetched_devices: result.records.len(),
            failed_batches: result.failures.len(),
            failed_devices: result.failures.iter().map(|f| f.batch.len()).sum(),
            total_batches: batches.len(),
            processed_batches,
            total_attempts,
            mismatched_batches,
            unreturned_devices: result.unreturned.len(),
            elapsed_seconds: elapsed,
            average_batch_seconds: if processed_batches > 0 {
                elapsed / processed_batches as f64
            } else {
                0.0
            },
            cancelled,
            status_counts: status_counts(&result.records),
            power: power_stats(&result.records),
        };

        info!(
            "Fetched {}/{} devices in {:.1}s ({} failed batches, {} attempts)",
            result.summary.fetched_devices,
            result.summary.requested_devices,
            elapsed,
            result.summary.failed_batches,
            total_attempts
        );

        result
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::testing::{record, Reply, ScriptedTransport};
    use crate::client::{RetryPolicy, Signer};
    use crate::error::{FailureKind, FetchError};
    use crate::plan::{generate_device_ids, make_batches};

    fn plan(devices: usize, batch_size: usize) -> Vec<Batch> {
        let ids = generate_device_ids("SN-", devices, 3).unwrap();
        make_batches(&ids, batch_size).unwrap()
    }

    fn executor(transport: ScriptedTransport) -> RequestExecutor<ScriptedTransport> {
        RequestExecutor::new(
            transport,
            Signer::new("/device/real/query", "secret"),
            RetryPolicy::default(),
        )
    }

    fn assert_secs(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 0.05,
            "expected ~{}s, got {}s",
            expected,
            actual
        );
    }

    fn options() -> AggregatorOptions {
        AggregatorOptions {
            rate_limit_interval: Duration::from_millis(1000),
            show_progress: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_fleet_instant_endpoint() {
        let executor = executor(ScriptedTransport::always(Reply::Echo));
        let batches = plan(500, 10);
        assert_eq!(batches.len(), 50);

        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&batches)
            .await;

        assert!(result.is_complete());
        assert_eq!(result.summary.fetched_devices, 500);
        assert_eq!(result.summary.requested_devices, 500);
        assert_eq!(result.summary.failed_batches, 0);
        assert_eq!(result.summary.processed_batches, 50);
        assert_eq!(result.summary.total_attempts, 50);
        // No wait after the last batch
        assert_secs(result.summary.elapsed_seconds, 49.0);
        assert_eq!(result.records[0].sn.as_str(), "SN-000");
        assert_eq!(result.records[499].sn.as_str(), "SN-499");
        assert_eq!(result.summary.status_counts.get("Online"), Some(&500));
        assert_eq!(result.summary.power.as_ref().unwrap().total_kw, 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_starts_respect_interval() {
        let executor = executor(ScriptedTransport::always(Reply::Echo));
        Aggregator::new(&executor, options(), StopSignal::never())
            .run(&plan(60, 10))
            .await;

        let calls = executor.transport().calls();
        assert_eq!(calls.len(), 6);
        for pair in calls.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_time_counts_toward_interval() {
        let transport = ScriptedTransport::scripted(
            vec![Reply::Fail(FetchError::RateLimitExceeded)],
            Reply::Echo,
        );
        let executor = executor(transport);
        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&plan(20, 10))
            .await;

        let calls = executor.transport().calls();
        assert_eq!(calls.len(), 3);
        // Batch 0 took 2s with its retry, so batch 1 starts without extra wait.
        let gap = calls[2].at - calls[0].at;
        assert!(gap >= Duration::from_millis(2000) && gap < Duration::from_millis(2050));
        assert_eq!(result.summary.total_attempts, 3);
        assert_eq!(result.summary.fetched_devices, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes() {
        let transport = ScriptedTransport::scripted(
            vec![
                Reply::Echo,
                Reply::Fail(FetchError::AuthenticationFailure {
                    status: 401,
                    body: "bad signature".to_string(),
                }),
                Reply::Records(vec![
                    record("SN-020", "3 kW", "Offline"),
                    record("SN-021", "1 kW", "Online"),
                    record("SN-022", "n/a", "Offline"),
                ]),
            ],
            Reply::Echo,
        );
        let executor = executor(transport);
        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&plan(40, 10))
            .await;

        let summary = &result.summary;
        assert_eq!(summary.requested_devices, 40);
        assert_eq!(summary.fetched_devices, 23);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.failed_devices, 10);
        assert_eq!(summary.mismatched_batches, 1);
        assert!(!result.is_complete());

        assert_eq!(result.failures[0].kind, FailureKind::AuthenticationFailure);
        assert_eq!(result.failures[0].batch.devices[0].as_str(), "SN-010");
        // Batch 2 answered for 3 of its 10 devices
        assert_eq!(summary.unreturned_devices, 7);
        assert_eq!(result.missing_devices().len(), 17);
        assert_eq!(result.missing_devices()[10].as_str(), "SN-023");

        assert_eq!(summary.status_counts.get("Online"), Some(&21));
        assert_eq!(summary.status_counts.get("Offline"), Some(&2));
        let power = summary.power.as_ref().unwrap();
        assert_eq!(power.readings, 22);
        assert_eq!(power.max_kw, 3.0);
        assert_eq!(power.min_kw, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_response_is_not_complete() {
        let executor = executor(ScriptedTransport::always(Reply::Records(vec![record(
            "SN-000", "2 kW", "Online",
        )])));
        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&plan(10, 10))
            .await;

        assert_eq!(result.summary.fetched_devices, 1);
        assert_eq!(result.summary.requested_devices, 10);
        assert_eq!(result.summary.failed_batches, 0);
        assert_eq!(result.summary.unreturned_devices, 9);
        assert!(!result.is_complete());

        let missing = result.missing_devices();
        assert_eq!(missing.len(), 9);
        assert_eq!(missing[0].as_str(), "SN-001");
        assert_eq!(missing[8].as_str(), "SN-009");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_has_no_aggregates() {
        let executor = executor(ScriptedTransport::always(Reply::Fail(
            FetchError::Rejected {
                status: 400,
                body: String::new(),
            },
        )));
        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&plan(30, 10))
            .await;

        assert_eq!(result.summary.fetched_devices, 0);
        assert_eq!(result.summary.failed_batches, 3);
        assert!(result.summary.power.is_none());
        assert!(result.summary.status_counts.is_empty());
        assert_secs(result.summary.elapsed_seconds, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plan() {
        let executor = executor(ScriptedTransport::always(Reply::Echo));
        let result = Aggregator::new(&executor, options(), StopSignal::never())
            .run(&[])
            .await;

        assert!(result.is_complete());
        assert_eq!(result.summary.processed_batches, 0);
        assert_eq!(result.summary.average_batch_seconds, 0.0);
        assert!(executor.transport().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pacing_keeps_partial_result() {
        let executor = executor(ScriptedTransport::always(Reply::Echo));
        let (handle, signal) = StopSignal::new();

        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            handle.stop();
        });

        let result = Aggregator::new(&executor, options(), signal)
            .run(&plan(100, 10))
            .await;

        assert!(result.summary.cancelled);
        assert!(!result.is_complete());
        assert_eq!(result.summary.processed_batches, 3);
        assert_eq!(result.summary.total_batches, 10);
        assert_eq!(result.summary.fetched_devices, 30);
        assert_secs(result.summary.elapsed_seconds, 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start() {
        let executor = executor(ScriptedTransport::always(Reply::Echo));
        let (handle, signal) = StopSignal::new();
        handle.stop();

        let result = Aggregator::new(&executor, options(), signal)
            .run(&plan(20, 10))
            .await;

        assert!(result.summary.cancelled);
        assert_eq!(result.summary.processed_batches, 0);
        assert!(executor.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn test_never_signal_does_not_fire() {
        let mut signal = StopSignal::never();
        assert!(!signal.is_stopped());
        let fired = tokio::time::timeout(Duration::from_millis(10), signal.stopped()).await;
        assert!(fired.is_err());
    }
}
