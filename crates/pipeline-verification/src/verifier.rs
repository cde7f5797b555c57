//! Verification Facade
//!
//! Named, scenario-oriented checks composed from the locator, poller,
//! log reader, tracer and aggregator. The facade borrows the scenario
//! context and holds nothing of its own; every error from the components
//! below surfaces unchanged so reports name the resource, the condition and
//! the elapsed time.

use condition_poller::{ConditionPoller, Probe};
use correlation_tracer::{EventOutcome, Stage, StageTarget, Trace, TraceEvent, TraceOutcome};
use pipeline_core::{
    CorrelationId, LogMatch, PollPolicy, ResourceHandle, ResourceKind, Result, TimeWindow,
    VerifyError,
};
use pipeline_metrics::{SlaReport, SlaRequirements};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::context::ScenarioContext;

pub struct Verifier<'a> {
    ctx: &'a ScenarioContext,
}

impl<'a> Verifier<'a> {
    pub fn new(ctx: &'a ScenarioContext) -> Self {
        Self { ctx }
    }

    fn recent_window(&self) -> TimeWindow {
        TimeWindow::last(self.ctx.config().verification.recent_window())
    }

    /// Wait until `handle` shows at least one execution in the recent window.
    #[instrument(skip(self, handle), fields(resource = %handle))]
    pub async fn was_invoked(&self, handle: &Arc<ResourceHandle>) -> Result<usize> {
        let aggregator = self.ctx.aggregator();
        let condition = format!("{} to be invoked", handle);
        let polled = self
            .ctx
            .poller()
            .poll(&condition, || async move {
                let count = aggregator.count(handle, &self.recent_window()).await?;
                Ok(if count > 0 {
                    Probe::Ready(count)
                } else {
                    Probe::pending("0 executions in recent window")
                })
            })
            .await?;
        Ok(polled.value)
    }

    /// Wait until `handle` has at least `times` executions in the last
    /// `minutes` minutes. The poll timeout is the smaller of that span and
    /// the scenario's policy timeout.
    #[instrument(skip(self, handle), fields(resource = %handle))]
    pub async fn invoked_at_least(
        &self,
        handle: &Arc<ResourceHandle>,
        times: usize,
        minutes: u64,
    ) -> Result<usize> {
        let policy = derived_policy(self.ctx.poller().policy(), minutes)?;
        let aggregator = self.ctx.aggregator();
        let condition = format!("{} to be invoked {} times within {} minutes", handle, times, minutes);
        let polled = ConditionPoller::new(policy)
            .poll(&condition, || async move {
                let count = aggregator.count_since(handle, minutes).await?;
                Ok(if count >= times {
                    Probe::Ready(count)
                } else {
                    Probe::pending(format!("observed count {} vs required {}", count, times))
                })
            })
            .await?;
        info!(count = polled.value, required = times, "invocation count reached");
        Ok(polled.value)
    }

    /// No failed execution in the recent window.
    pub async fn has_no_errors(&self, handle: &Arc<ResourceHandle>) -> Result<()> {
        let records = self
            .ctx
            .aggregator()
            .records(handle, &self.recent_window())
            .await?;
        let failed: Vec<String> = records
            .iter()
            .filter(|record| !record.succeeded())
            .map(|record| {
                format!(
                    "{} ({})",
                    record.execution_id(),
                    record.error_detail().unwrap_or("no detail")
                )
            })
            .collect();
        if failed.is_empty() {
            return Ok(());
        }
        Err(VerifyError::AssertionFailed {
            check: "has no errors".to_string(),
            resource: handle.to_string(),
            observed: format!("{} failed executions: {}", failed.len(), failed.join(", ")),
        })
    }

    /// Wait until any of `patterns` shows up in the recent window's records.
    pub async fn logs_contain_any<S: AsRef<str>>(
        &self,
        handle: &Arc<ResourceHandle>,
        patterns: &[S],
    ) -> Result<LogMatch> {
        let reader = self.ctx.aggregator().reader();
        let wanted: Vec<&str> = patterns.iter().map(|pattern| pattern.as_ref()).collect();
        let condition = format!("{} logs to contain any of {:?}", handle, wanted);
        let wanted = &wanted;
        let polled = self
            .ctx
            .poller()
            .poll(&condition, || async move {
                let result = reader
                    .contains_any(handle, &self.recent_window(), wanted.as_slice())
                    .await?;
                Ok(if result.found {
                    Probe::Ready(result)
                } else {
                    Probe::pending("no pattern matched")
                })
            })
            .await?;
        Ok(polled.value)
    }

    /// None of `patterns` occurs in the recent window's records.
    pub async fn logs_contain_none<S: AsRef<str>>(
        &self,
        handle: &Arc<ResourceHandle>,
        patterns: &[S],
    ) -> Result<()> {
        let result = self
            .ctx
            .aggregator()
            .reader()
            .contains_any(handle, &self.recent_window(), patterns)
            .await?;
        if !result.found {
            return Ok(());
        }
        Err(VerifyError::AssertionFailed {
            check: "logs contain none of the patterns".to_string(),
            resource: handle.to_string(),
            observed: format!("matched {}", result.matches.join(", ")),
        })
    }

    /// Evaluate `requirements` over the last `minutes` minutes.
    pub async fn sla_met(
        &self,
        handle: &Arc<ResourceHandle>,
        minutes: u64,
        requirements: &SlaRequirements,
    ) -> Result<SlaReport> {
        let report = self
            .ctx
            .aggregator()
            .verify_sla(handle, &TimeWindow::last_minutes(minutes), requirements)
            .await?;
        if report.meets_sla {
            return Ok(report);
        }
        Err(VerifyError::AssertionFailed {
            check: "SLA met".to_string(),
            resource: handle.to_string(),
            observed: report.violation_messages().join("; "),
        })
    }

    /// Wait until `correlation_id` has an event at every stage in `stages`.
    ///
    /// A partial trace is retried; an out-of-order trace aborts at once.
    #[instrument(skip(self, correlation_id, stages), fields(correlation_id = %correlation_id))]
    pub async fn pipeline_completed(
        &self,
        correlation_id: &CorrelationId,
        stages: &[StageTarget],
    ) -> Result<Trace> {
        let tracer = self.ctx.tracer();
        let condition = format!("correlation id {} to reach every stage", correlation_id);
        let polled = self
            .ctx
            .poller()
            .poll(&condition, || async move {
                Ok(match tracer.trace(correlation_id, stages).await? {
                    TraceOutcome::Complete(trace) => Probe::Ready(trace),
                    TraceOutcome::Partial(partial) => Probe::Pending(partial.describe()),
                })
            })
            .await?;
        Ok(polled.value)
    }

    /// [`pipeline_completed`](Self::pipeline_completed) for the scenario's
    /// own correlation id and resolved resources.
    pub async fn scenario_pipeline_completed(&self) -> Result<Trace> {
        let correlation_id = self.ctx.state().require_correlation_id()?;
        let stages = self.ctx.expected_stages();
        self.pipeline_completed(correlation_id, &stages).await
    }

    /// Wait until a state machine execution carrying `correlation_id`
    /// succeeds. A failed execution fails the check immediately.
    pub async fn state_machine_succeeded(
        &self,
        state_machine: &Arc<ResourceHandle>,
        correlation_id: &CorrelationId,
    ) -> Result<TraceEvent> {
        self.await_stage_event(Stage::StateMachineExecution, state_machine, correlation_id, true)
            .await
    }

    /// Wait until a message carrying `correlation_id` was delivered to
    /// `queue`. Delivery records are inspected, so the message stays on the
    /// queue for consumers.
    pub async fn message_delivered(
        &self,
        queue: &Arc<ResourceHandle>,
        correlation_id: &CorrelationId,
    ) -> Result<TraceEvent> {
        self.await_stage_event(Stage::MessageDelivery, queue, correlation_id, false)
            .await
    }

    async fn await_stage_event(
        &self,
        stage: Stage,
        resource: &Arc<ResourceHandle>,
        correlation_id: &CorrelationId,
        require_success: bool,
    ) -> Result<TraceEvent> {
        expect_kind(resource, stage.resource_kind())?;
        let tracer = self.ctx.tracer();
        let target = StageTarget::new(stage, Arc::clone(resource));
        let target = &target;
        let condition = format!("{} for {} on {}", stage, correlation_id, resource);
        let polled = self
            .ctx
            .poller()
            .poll(&condition, || async move {
                let events = tracer
                    .stage_events(correlation_id, target, &tracer.search_window())
                    .await?;
                let Some(event) = events.into_iter().next_back() else {
                    return Ok(Probe::pending("no matching event"));
                };
                if !require_success {
                    return Ok(Probe::Ready(event));
                }
                if let EventOutcome::Failed { detail } = &event.outcome {
                    return Err(VerifyError::AssertionFailed {
                        check: format!("{} succeeded", stage),
                        resource: resource.to_string(),
                        observed: format!("{} failed: {}", event.source_id, detail),
                    });
                }
                if event.outcome == EventOutcome::InProgress {
                    return Ok(Probe::Pending(format!("{} in progress", event.source_id)));
                }
                Ok(Probe::Ready(event))
            })
            .await?;
        Ok(polled.value)
    }
}

/// "Within M minutes" bounds the poll: timeout is `min(M, policy timeout)`.
fn derived_policy(policy: &PollPolicy, minutes: u64) -> Result<PollPolicy> {
    let span = Duration::from_secs(minutes.saturating_mul(60));
    if span >= policy.timeout() {
        return Ok(policy.clone());
    }
    policy.with_timeout(span)
}

fn expect_kind(resource: &ResourceHandle, kind: ResourceKind) -> Result<()> {
    if resource.kind() == kind {
        return Ok(());
    }
    Err(VerifyError::InvalidTrace {
        reason: format!("expected a {}, got {}", kind, resource),
    })
}
