//! Correlation Tracer
//!
//! Records which artifact each correlation id was attached to and rebuilds
//! the causal chain of events the id touched. Stages are searched in the
//! caller's causal order; a stage with evidence whose predecessor has none is
//! an anomaly, reported as [`VerifyError::OutOfOrderTrace`].

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pipeline_core::{
    ArtifactRef, CloudProvider, CorrelationId, ExecutionLogReader, ExecutionStatus, Result,
    TimeWindow, TraceConfig, VerifyError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::stage::{EventOutcome, PartialTrace, Stage, StageTarget, Trace, TraceEvent, TraceOutcome};

pub struct CorrelationTracer {
    provider: Arc<dyn CloudProvider>,
    reader: ExecutionLogReader,
    attachments: RwLock<HashMap<CorrelationId, ArtifactRef>>,
    lookback: Duration,
    clock_skew: Duration,
}

impl std::fmt::Debug for CorrelationTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTracer")
            .field("attached_ids", &self.attachments.read().len())
            .field("lookback", &self.lookback)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl CorrelationTracer {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self::from_config(provider, &TraceConfig::default())
    }

    pub fn from_config(provider: Arc<dyn CloudProvider>, config: &TraceConfig) -> Self {
        Self {
            reader: ExecutionLogReader::new(Arc::clone(&provider)),
            provider,
            attachments: RwLock::new(HashMap::new()),
            lookback: config.lookback(),
            clock_skew: config.clock_skew(),
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Associate `correlation_id` with `artifact`.
    ///
    /// Must be called before the triggering action is dispatched. Attaching
    /// the same pair twice is a no-op; reusing an id for a different
    /// artifact is rejected.
    pub fn attach(&self, artifact: ArtifactRef, correlation_id: &CorrelationId) -> Result<()> {
        let mut attachments = self.attachments.write();
        if let Some(existing) = attachments.get(correlation_id) {
            if *existing == artifact {
                return Ok(());
            }
            return Err(VerifyError::CorrelationConflict {
                correlation_id: correlation_id.to_string(),
                artifact: existing.to_string(),
            });
        }
        debug!(%correlation_id, %artifact, "attached correlation id");
        attachments.insert(correlation_id.clone(), artifact);
        Ok(())
    }

    pub fn artifact_for(&self, correlation_id: &CorrelationId) -> Option<ArtifactRef> {
        self.attachments.read().get(correlation_id).cloned()
    }

    pub fn attached_ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<CorrelationId> = self.attachments.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `[now - lookback, now + clock_skew]`
    pub fn window_for(&self, lookback: Duration) -> TimeWindow {
        self.window_ending_at(Utc::now(), lookback)
    }

    /// `[end - lookback, end + clock_skew]`
    pub fn window_ending_at(&self, end: DateTime<Utc>, lookback: Duration) -> TimeWindow {
        TimeWindow::ending_at(end, lookback).extended_by(self.clock_skew)
    }

    pub fn search_window(&self) -> TimeWindow {
        self.window_for(self.lookback)
    }

    /// Trace `correlation_id` through `stages` using the configured lookback.
    pub async fn trace(
        &self,
        correlation_id: &CorrelationId,
        stages: &[StageTarget],
    ) -> Result<TraceOutcome> {
        self.trace_within(correlation_id, stages, self.lookback).await
    }

    pub async fn trace_within(
        &self,
        correlation_id: &CorrelationId,
        stages: &[StageTarget],
        lookback: Duration,
    ) -> Result<TraceOutcome> {
        self.trace_in(correlation_id, stages, self.window_for(lookback))
            .await
    }

    /// Trace over a window that ends at `end` instead of now, for replaying
    /// exported records.
    pub async fn trace_at(
        &self,
        correlation_id: &CorrelationId,
        stages: &[StageTarget],
        end: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<TraceOutcome> {
        self.trace_in(correlation_id, stages, self.window_ending_at(end, lookback))
            .await
    }

    #[instrument(skip(self, correlation_id, stages), fields(correlation_id = %correlation_id, stages = stages.len()))]
    async fn trace_in(
        &self,
        correlation_id: &CorrelationId,
        stages: &[StageTarget],
        window: TimeWindow,
    ) -> Result<TraceOutcome> {
        validate_stages(stages)?;

        let mut events = Vec::with_capacity(stages.len());
        let mut missing = Vec::new();
        for target in stages {
            let found = self.stage_events(correlation_id, target, &window).await?;
            let predecessor_missing = missing.first().copied();
            match (found.into_iter().next(), predecessor_missing) {
                (None, _) => missing.push(target.stage),
                (Some(_), Some(absent)) => {
                    warn!(stage = %target.stage, missing = %absent, "stage observed before its predecessor");
                    return Err(VerifyError::OutOfOrderTrace {
                        correlation_id: correlation_id.to_string(),
                        stage: target.stage.to_string(),
                        missing: absent.to_string(),
                    });
                }
                (Some(earliest), None) => events.push(earliest),
            }
        }

        events.sort_by_key(|event: &TraceEvent| event.timestamp);
        if missing.is_empty() {
            debug!(events = events.len(), "trace complete");
            Ok(TraceOutcome::Complete(Trace {
                correlation_id: correlation_id.clone(),
                events,
            }))
        } else {
            debug!(events = events.len(), missing = missing.len(), "trace partial");
            Ok(TraceOutcome::Partial(PartialTrace {
                correlation_id: correlation_id.clone(),
                events,
                missing,
            }))
        }
    }

    /// Events at one stage whose payload mentions `correlation_id`, oldest first.
    pub async fn stage_events(
        &self,
        correlation_id: &CorrelationId,
        target: &StageTarget,
        window: &TimeWindow,
    ) -> Result<Vec<TraceEvent>> {
        match target.stage {
            Stage::StateMachineExecution => {
                self.state_machine_events(correlation_id, target, window)
                    .await
            }
            _ => {
                let records = self.reader.read(&target.resource, window).await?;
                Ok(records
                    .into_iter()
                    .filter(|record| record.mentions_id(correlation_id))
                    .map(|record| TraceEvent {
                        stage: target.stage,
                        correlation_id: correlation_id.clone(),
                        timestamp: record.start_time(),
                        resource: Arc::clone(&target.resource),
                        outcome: if !record.succeeded() {
                            EventOutcome::Failed {
                                detail: record.error_detail().unwrap_or("unknown error").to_string(),
                            }
                        } else if record.end_time().is_none() {
                            EventOutcome::InProgress
                        } else {
                            EventOutcome::Succeeded
                        },
                        source_id: record.execution_id().to_string(),
                    })
                    .collect())
            }
        }
    }

    async fn state_machine_events(
        &self,
        correlation_id: &CorrelationId,
        target: &StageTarget,
        window: &TimeWindow,
    ) -> Result<Vec<TraceEvent>> {
        let mut executions = self
            .provider
            .list_state_machine_executions(&target.resource)
            .await?;
        executions.retain(|execution| window.contains(execution.start_time));
        executions.sort_by_key(|execution| execution.start_time);

        let mut events = Vec::new();
        for execution in executions {
            let mut matched = correlation_id.appears_in(&execution.input);
            if !matched {
                let history = self
                    .provider
                    .get_execution_history(&execution.execution_id)
                    .await?;
                matched = history
                    .iter()
                    .any(|event| correlation_id.appears_in(&event.details));
            }
            if !matched {
                continue;
            }
            let outcome = match execution.status {
                ExecutionStatus::Running => EventOutcome::InProgress,
                ExecutionStatus::Succeeded => EventOutcome::Succeeded,
                status => EventOutcome::Failed {
                    detail: execution
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{:?}", status)),
                },
            };
            events.push(TraceEvent {
                stage: Stage::StateMachineExecution,
                correlation_id: correlation_id.clone(),
                timestamp: execution.start_time,
                resource: Arc::clone(&target.resource),
                outcome,
                source_id: execution.execution_id,
            });
        }
        Ok(events)
    }
}

fn validate_stages(stages: &[StageTarget]) -> Result<()> {
    if stages.is_empty() {
        return Err(VerifyError::InvalidTrace {
            reason: "at least one stage is required".to_string(),
        });
    }
    let mut seen = HashSet::new();
    for target in stages {
        if target.resource.kind() != target.stage.resource_kind() {
            return Err(VerifyError::InvalidTrace {
                reason: format!(
                    "{} stage needs a {}, got {}",
                    target.stage,
                    target.stage.resource_kind(),
                    target.resource
                ),
            });
        }
        if !seen.insert(target.stage) {
            return Err(VerifyError::InvalidTrace {
                reason: format!("{} stage listed more than once", target.stage),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pipeline_core::{
        HistoryEvent, InMemoryProvider, PipelineRoute, ProviderFixture, RawExecution,
        ResourceKind, ResourceLocator, StateMachineExecution, CORRELATION_METADATA_KEY,
    };
    use std::collections::BTreeMap;

    struct Fixture {
        provider: Arc<InMemoryProvider>,
        locator: ResourceLocator,
        tracer: CorrelationTracer,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_resource(ResourceKind::Bucket, "uploads")
                .with_resource(ResourceKind::Function, "processor")
                .with_resource(ResourceKind::StateMachine, "workflow")
                .with_resource(ResourceKind::Queue, "results"),
        );
        Fixture {
            locator: ResourceLocator::new(provider.clone()),
            tracer: CorrelationTracer::new(provider.clone()).with_lookback(Duration::from_secs(300)),
            provider,
        }
    }

    impl Fixture {
        async fn target(&self, stage: Stage, name: &str) -> StageTarget {
            let handle = self.locator.locate(stage.resource_kind(), name).await.unwrap();
            StageTarget::new(stage, handle)
        }

        async fn standard_stages(&self) -> Vec<StageTarget> {
            vec![
                self.target(Stage::Upload, "uploads").await,
                self.target(Stage::Invocation, "processor").await,
                self.target(Stage::StateMachineExecution, "workflow").await,
            ]
        }

        async fn upload(&self, key: &str, id: &CorrelationId) {
            self.tracer
                .attach(ArtifactRef::object("uploads", key), id)
                .unwrap();
            let bucket = self.locator.locate(ResourceKind::Bucket, "uploads").await.unwrap();
            let metadata = BTreeMap::from([(CORRELATION_METADATA_KEY.to_string(), id.to_string())]);
            self.provider
                .upload_artifact(&bucket, key, b"{\"items\":3}", &metadata)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn full_pipeline_yields_complete_ordered_trace() {
        let fx = fixture();
        fx.provider.connect(
            PipelineRoute::new("uploads", "processor")
                .then_state_machine("workflow")
                .then_queue("results"),
        );
        let id = CorrelationId::from("c1");
        fx.upload("test-data.json", &id).await;

        let outcome = fx.tracer.trace(&id, &fx.standard_stages().await).await.unwrap();
        let TraceOutcome::Complete(trace) = outcome else {
            panic!("expected complete trace, got {:?}", outcome);
        };
        assert_eq!(
            trace.stages(),
            vec![Stage::Upload, Stage::Invocation, Stage::StateMachineExecution]
        );
        assert!(trace.events.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        assert!(!trace.has_failures());
    }

    #[tokio::test]
    async fn attached_id_is_found_at_upload_stage() {
        let fx = fixture();
        let id = CorrelationId::generate();
        fx.upload("file.json", &id).await;

        let upload = fx.target(Stage::Upload, "uploads").await;
        let window = TimeWindow::last(Duration::from_secs(60)).extended_by(Duration::from_secs(5));
        let events = fx.tracer.stage_events(&id, &upload, &window).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, id);
        assert_eq!(
            fx.tracer.artifact_for(&id),
            Some(ArtifactRef::object("uploads", "file.json"))
        );
    }

    #[tokio::test]
    async fn missing_downstream_stage_yields_partial_trace() {
        let fx = fixture();
        fx.provider.connect(PipelineRoute::new("uploads", "processor"));
        let id = CorrelationId::from("c2");
        fx.upload("partial.json", &id).await;

        let outcome = fx.tracer.trace(&id, &fx.standard_stages().await).await.unwrap();
        match outcome {
            TraceOutcome::Partial(partial) => {
                assert_eq!(partial.missing, vec![Stage::StateMachineExecution]);
                assert_eq!(partial.events.len(), 2);
            }
            other => panic!("expected partial trace, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn later_stage_without_predecessor_is_out_of_order() {
        let fx = fixture();
        fx.provider
            .record_execution(
                ResourceKind::Function,
                "processor",
                RawExecution::new("req-orphan", Utc::now())
                    .finished_after(Duration::from_millis(50))
                    .with_payload("processing orphan-id"),
            )
            .unwrap();

        let err = fx
            .tracer
            .trace(&CorrelationId::from("orphan-id"), &fx.standard_stages().await)
            .await
            .unwrap_err();
        match err {
            VerifyError::OutOfOrderTrace { stage, missing, .. } => {
                assert_eq!(stage, "invocation");
                assert_eq!(missing, "upload");
            }
            other => panic!("expected out-of-order error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn tracing_twice_without_new_events_is_idempotent() {
        let fx = fixture();
        fx.provider.connect(PipelineRoute::new("uploads", "processor"));
        let id = CorrelationId::from("c3");
        fx.upload("again.json", &id).await;
        let stages = fx.standard_stages().await;

        let first = fx.tracer.trace(&id, &stages).await.unwrap();
        let second = fx.tracer.trace(&id, &stages).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn state_machine_match_falls_back_to_history() {
        let fx = fixture();
        let now = Utc::now();
        fx.provider
            .record_state_machine_execution(
                "workflow",
                StateMachineExecution {
                    execution_id: "exec-1".to_string(),
                    name: "exec-1".to_string(),
                    status: ExecutionStatus::Failed,
                    start_time: now - TimeDelta::seconds(5),
                    stop_time: Some(now),
                    input: "{}".to_string(),
                    output: None,
                    error: Some("States.TaskFailed".to_string()),
                },
                vec![HistoryEvent {
                    id: 4,
                    timestamp: now,
                    event_type: "TaskScheduled".to_string(),
                    details: "{\"correlation_id\":\"c4\"}".to_string(),
                }],
            )
            .unwrap();

        let target = fx.target(Stage::StateMachineExecution, "workflow").await;
        let window = TimeWindow::last(Duration::from_secs(60));
        let events = fx
            .tracer
            .stage_events(&CorrelationId::from("c4"), &target, &window)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].outcome,
            EventOutcome::Failed {
                detail: "States.TaskFailed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn reusing_an_id_for_another_artifact_is_rejected() {
        let fx = fixture();
        let id = CorrelationId::from("c5");
        fx.tracer.attach(ArtifactRef::object("uploads", "a.json"), &id).unwrap();
        fx.tracer.attach(ArtifactRef::object("uploads", "a.json"), &id).unwrap();
        let err = fx
            .tracer
            .attach(ArtifactRef::object("uploads", "b.json"), &id)
            .unwrap_err();
        assert!(matches!(err, VerifyError::CorrelationConflict { .. }));
        assert_eq!(fx.tracer.attached_ids(), vec![id]);
    }

    #[tokio::test]
    async fn rejects_mismatched_stage_resources() {
        let fx = fixture();
        let wrong = StageTarget::new(
            Stage::Upload,
            fx.locator.locate(ResourceKind::Queue, "results").await.unwrap(),
        );
        let err = fx.tracer.trace(&CorrelationId::from("c6"), &[wrong]).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidTrace { .. }));
        let err = fx.tracer.trace(&CorrelationId::from("c6"), &[]).await.unwrap_err();
        assert!(matches!(err, VerifyError::InvalidTrace { .. }));
    }

    #[tokio::test]
    async fn transient_provider_errors_propagate_for_the_poller() {
        let fx = fixture();
        let stages = fx.standard_stages().await;
        fx.provider.fail_next(1);
        let err = fx.tracer.trace(&CorrelationId::from("c7"), &stages).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn fixture_messages_complete_a_delivery_trace() {
        let sent_at = "2026-01-01T00:00:03Z".parse::<DateTime<Utc>>().unwrap();
        let fixture = ProviderFixture::from_json(
            r#"{
                "resources": [
                    {
                        "kind": "function",
                        "name": "processor",
                        "executions": [
                            {"id": "req-1", "start_time": "2026-01-01T00:00:01Z", "end_time": "2026-01-01T00:00:02Z",
                             "payload": "EVENT {\"correlation_id\":\"c9\"}"},
                            {"id": "req-2", "start_time": "2026-01-01T00:00:04Z", "end_time": "2026-01-01T00:00:05Z",
                             "payload": "EVENT {\"correlation_id\":\"c90\"}"}
                        ]
                    },
                    {
                        "kind": "queue",
                        "name": "results",
                        "messages": [
                            {"message_id": "m1", "body": "{\"correlation_id\":\"c9\"}", "sent_at": "2026-01-01T00:00:03Z"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        let provider = Arc::new(InMemoryProvider::from_fixture(fixture).unwrap());
        let locator = ResourceLocator::new(provider.clone());
        let stages = vec![
            StageTarget::new(
                Stage::Invocation,
                locator.locate(ResourceKind::Function, "processor").await.unwrap(),
            ),
            StageTarget::new(
                Stage::MessageDelivery,
                locator.locate(ResourceKind::Queue, "results").await.unwrap(),
            ),
        ];
        let tracer = CorrelationTracer::new(provider);
        let end = "2026-01-01T00:01:00Z".parse::<DateTime<Utc>>().unwrap();

        let outcome = tracer
            .trace_at(&CorrelationId::from("c9"), &stages, end, Duration::from_secs(120))
            .await
            .unwrap();
        let TraceOutcome::Complete(trace) = outcome else {
            panic!("expected complete trace, got {:?}", outcome);
        };
        assert_eq!(trace.stages(), vec![Stage::Invocation, Stage::MessageDelivery]);
        assert_eq!(trace.events[0].source_id, "req-1");
        assert_eq!(trace.events[1].source_id, "m1");
        assert_eq!(trace.events[1].timestamp, sent_at);

        let too_early = "2025-12-31T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let outcome = tracer
            .trace_at(&CorrelationId::from("c9"), &stages, too_early, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn ids_sharing_a_prefix_do_not_cross_match() {
        let fx = fixture();
        fx.provider.connect(PipelineRoute::new("uploads", "processor"));
        fx.upload("ten.json", &CorrelationId::from("c10")).await;

        let invocation = fx.target(Stage::Invocation, "processor").await;
        let window = TimeWindow::last(Duration::from_secs(60)).extended_by(Duration::from_secs(5));
        let short = fx
            .tracer
            .stage_events(&CorrelationId::from("c1"), &invocation, &window)
            .await
            .unwrap();
        assert!(short.is_empty());
        let exact = fx
            .tracer
            .stage_events(&CorrelationId::from("c10"), &invocation, &window)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
    }
}
