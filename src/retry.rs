use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{DeliveryOutcome, DeliveryStatus, TransportError};
use crate::telemetry::metric_inc;
use crate::transport::Transport;
use crate::types::NotificationJob;

pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(100);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(3_000);

/// Flat, jittered retry policy.
///
/// Backoff does not grow between attempts; jitter only spreads out many hosts
/// notifying the same target at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one.
    pub tries: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

/// Decision after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Stop here with this status.
    Terminal(DeliveryStatus),
    /// Sleep, then try again.
    Retry,
    /// Retryable failure on the last attempt.
    Exhausted,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retry_count(crate::config::DEFAULT_RETRY_COUNT)
    }
}

impl RetryPolicy {
    pub fn from_retry_count(retry_count: u32) -> Self {
        Self {
            tries: retry_count.saturating_add(1),
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }

    /// Override the backoff window.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max.max(min);
        self
    }

    /// Classify the result of attempt `attempt` (zero-based).
    pub fn classify(&self, attempt: u32, result: &Result<u16, TransportError>) -> Verdict {
        match result {
            Ok(100..=399) => Verdict::Terminal(DeliveryStatus::Delivered),
            Ok(400..=499) => Verdict::Terminal(DeliveryStatus::ClientRejected),
            // 5xx, a status below 100, or no response at all.
            Ok(_) | Err(_) => {
                if attempt.saturating_add(1) < self.tries.max(1) {
                    Verdict::Retry
                } else {
                    Verdict::Exhausted
                }
            }
        }
    }

    /// Random sleep in `[backoff_min, backoff_max)`.
    pub fn backoff(&self) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = self.backoff_max.as_millis() as u64;
        if max <= min {
            return self.backoff_min;
        }
        Duration::from_millis(fastrand::u64(min..max))
    }
}

/// Shutdown signal observed by backoff sleeps.
///
/// A closed channel counts as stopped: the owner of the sender is gone.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    /// Stop once `rx` observes `true` or its sender is dropped.
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_stopped(&self) -> bool {
        match self.rx {
            Some(ref rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Resolve once stop is requested.
    pub async fn stopped(&mut self) {
        let Some(ref mut rx) = self.rx else {
            return std::future::pending().await;
        };
        // `wait_for` errors when the sender is dropped, which also means stop.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

/// Run the whole attempt sequence for one job.
///
/// Never fails: every path ends in a logged [`DeliveryOutcome`].
pub async fn deliver_with_retry(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    job: &NotificationJob,
    stop: &mut StopSignal,
) -> DeliveryOutcome {
    let tries = policy.tries.max(1);
    let mut attempt = 0u32;

    loop {
        let result = transport.post(&job.body).await;
        let code = result.as_ref().ok().copied();
        let attempts = attempt + 1;

        match policy.classify(attempt, &result) {
            Verdict::Terminal(status) => {
                let outcome = DeliveryOutcome { status, code, attempts };
                info!(
                    trace = %job.trace,
                    url = transport.target(),
                    try_no = attempts,
                    tries,
                    "notification {}", outcome
                );
                metric_inc(match status {
                    DeliveryStatus::ClientRejected => "notifier.delivery.rejected",
                    _ => "notifier.delivery.delivered",
                });
                return outcome;
            }

            Verdict::Exhausted => {
                let outcome = DeliveryOutcome {
                    status: DeliveryStatus::Exhausted,
                    code,
                    attempts,
                };
                log_failed_attempt(job, transport, attempts, tries, &result, None);
                warn!(trace = %job.trace, url = transport.target(), "notification {}", outcome);
                metric_inc("notifier.delivery.exhausted");
                return outcome;
            }

            Verdict::Retry => {
                let pause = policy.backoff();
                log_failed_attempt(job, transport, attempts, tries, &result, Some(pause));
                metric_inc("notifier.delivery.retry");

                tokio::select! {
                    biased;
                    _ = stop.stopped() => {
                        let outcome = DeliveryOutcome {
                            status: DeliveryStatus::Retryable,
                            code,
                            attempts,
                        };
                        info!(trace = %job.trace, "backoff interrupted by shutdown, notification {}", outcome);
                        return outcome;
                    }
                    _ = sleep(pause) => {}
                }
                attempt += 1;
            }
        }
    }
}

fn log_failed_attempt(
    job: &NotificationJob,
    transport: &dyn Transport,
    try_no: u32,
    tries: u32,
    result: &Result<u16, TransportError>,
    pause: Option<Duration>,
) {
    let sleep_ms = pause.map(|p| p.as_millis() as u64).unwrap_or(0);
    match result {
        Ok(code) => warn!(
            trace = %job.trace,
            url = transport.target(),
            try_no,
            tries,
            code,
            sleep_ms,
            "notification attempt failed"
        ),
        Err(err) => warn!(
            trace = %job.trace,
            url = transport.target(),
            try_no,
            tries,
            sleep_ms,
            error = %err,
            "notification attempt failed"
        ),
    }
}
