//! # Condition Poller
//!
//! Re-evaluates a side-effect-free probe until it reports readiness or the
//! [`PollPolicy`] budget runs out. The wait between attempts is a tokio sleep,
//! so concurrent scenarios keep making progress while one is waiting.
//!
//! Errors returned by the probe are classified with
//! [`VerifyError::is_retryable`]: transient provider failures count as "not
//! yet true" and are retried, anything else aborts the poll immediately.

use std::future::Future;
use std::time::Duration;

use pipeline_core::{PollPolicy, Result, VerifyError};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Outcome of one probe evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    /// Not yet true; carries a description of the observed state.
    Pending(String),
}

impl<T> Probe<T> {
    pub fn pending(observed: impl Into<String>) -> Self {
        Probe::Pending(observed.into())
    }
}

/// Successful poll result with the attempt statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ConditionPoller {
    policy: PollPolicy,
}

impl ConditionPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll `probe` until it returns [`Probe::Ready`].
    ///
    /// Fails with [`VerifyError::Timeout`] once the elapsed time reaches the
    /// policy timeout (or the attempt cap is hit), reporting the attempt
    /// count and the last observed state.
    #[instrument(skip(self, probe), fields(timeout = ?self.policy.timeout(), interval = ?self.policy.interval()))]
    pub async fn poll<T, F, Fut>(&self, condition: &str, mut probe: F) -> Result<Polled<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let started = Instant::now();
        let timeout = self.policy.timeout();
        let deadline = started + timeout;
        let mut attempts: u32 = 0;
        let mut last_observed = String::from("no observation");

        loop {
            attempts = attempts.saturating_add(1);
            // An evaluation that outlives the deadline counts as the final attempt.
            let evaluation = match timeout_at(deadline, probe()).await {
                Ok(evaluation) => evaluation,
                Err(_) => {
                    last_observed =
                        format!("evaluation still running at deadline (last: {})", last_observed);
                    return Err(self.timed_out(condition, started, attempts, last_observed));
                }
            };
            match evaluation {
                Ok(Probe::Ready(value)) => {
                    let elapsed = started.elapsed();
                    info!(attempts, ?elapsed, "condition met: {}", condition);
                    return Ok(Polled {
                        value,
                        attempts,
                        elapsed,
                    });
                }
                Ok(Probe::Pending(observed)) => {
                    debug!(attempt = attempts, observed = observed.as_str(), "condition not yet met");
                    last_observed = observed;
                }
                Err(e) if e.is_retryable() => {
                    debug!(attempt = attempts, error = %e, "transient failure while polling");
                    last_observed = format!("transient error: {}", e);
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "aborting poll on non-retryable error");
                    return Err(e);
                }
            }

            let elapsed = started.elapsed();
            let attempts_exhausted = self
                .policy
                .max_attempts()
                .is_some_and(|max| attempts >= max);
            if elapsed >= timeout || attempts_exhausted {
                return Err(self.timed_out(condition, started, attempts, last_observed));
            }

            let delay = self.policy.next_delay(attempts).min(timeout - elapsed);
            sleep(delay).await;
        }
    }

    fn timed_out(
        &self,
        condition: &str,
        started: Instant,
        attempts: u32,
        last_observed: String,
    ) -> VerifyError {
        let elapsed = started.elapsed();
        warn!(
            attempts,
            ?elapsed,
            last_observed = last_observed.as_str(),
            "timed out waiting for {}",
            condition
        );
        VerifyError::Timeout {
            condition: condition.to_string(),
            elapsed,
            attempts,
            timeout: self.policy.timeout(),
            interval: self.policy.interval(),
            last_observed,
        }
    }

    /// Boolean convenience over [`poll`](Self::poll).
    pub async fn await_true<F, Fut>(&self, condition: &str, mut probe: F) -> Result<Polled<()>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(condition, || {
            let evaluation = probe();
            async move {
                Ok(if evaluation.await? {
                    Probe::Ready(())
                } else {
                    Probe::pending("false")
                })
            }
        })
        .await
    }
}
