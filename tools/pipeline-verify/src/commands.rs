use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use correlation_tracer::{CorrelationTracer, EventOutcome, Stage, StageTarget, TraceOutcome};
use pipeline_core::{
    CloudProvider, CorrelationId, EngineConfig, ExecutionLogReader, InMemoryProvider,
    ProviderFixture, ResourceHandle, ResourceLocator, TimeWindow,
};
use pipeline_metrics::{MetricsAggregator, SlaMetric, SlaRequirements};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::Target;

/// What a subcommand prints, and whether the check it ran passed.
pub struct Output {
    pub body: serde_json::Value,
    pub passed: bool,
    pub summary: String,
}

impl Output {
    fn passed(body: serde_json::Value) -> Self {
        Self {
            body,
            passed: true,
            summary: String::new(),
        }
    }
}

pub fn parse_requirement(entry: &str) -> Result<(SlaMetric, f64), String> {
    SlaRequirements::parse_entry(entry).map_err(|e| e.to_string())
}

pub fn parse_stage(entry: &str) -> Result<(Stage, String), String> {
    let (stage, resource) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected stage=resource, got '{}'", entry))?;
    Ok((stage.trim().parse()?, resource.trim().to_string()))
}

pub async fn load_fixture(path: &Path) -> anyhow::Result<Arc<dyn CloudProvider>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let fixture = ProviderFixture::from_json(&json)?;
    info!(resources = fixture.resources.len(), "loaded fixture");
    Ok(Arc::new(InMemoryProvider::from_fixture(fixture)?))
}

async fn resolve(
    provider: &Arc<dyn CloudProvider>,
    target: &Target,
) -> anyhow::Result<(Arc<ResourceHandle>, TimeWindow)> {
    let handle = ResourceLocator::new(Arc::clone(provider))
        .locate(target.kind, &target.name)
        .await?;
    let window = TimeWindow::ending_at(
        target.at.unwrap_or_else(Utc::now),
        Duration::from_secs(target.minutes.saturating_mul(60)),
    );
    Ok((handle, window))
}

pub async fn count(provider: Arc<dyn CloudProvider>, target: &Target) -> anyhow::Result<Output> {
    let (handle, window) = resolve(&provider, target).await?;
    let count = MetricsAggregator::new(provider).count(&handle, &window).await?;
    Ok(Output::passed(json!({
        "resource": handle.to_string(),
        "windowMinutes": target.minutes,
        "executionCount": count,
    })))
}

pub async fn metrics(provider: Arc<dyn CloudProvider>, target: &Target) -> anyhow::Result<Output> {
    let (handle, window) = resolve(&provider, target).await?;
    let metrics = MetricsAggregator::new(provider).metrics(&handle, &window).await?;
    Ok(Output::passed(serde_json::to_value(metrics)?))
}

pub async fn sla(
    provider: Arc<dyn CloudProvider>,
    target: &Target,
    entries: Vec<(SlaMetric, f64)>,
) -> anyhow::Result<Output> {
    let mut requirements = SlaRequirements::new();
    for (metric, threshold) in entries {
        requirements.insert(metric, threshold)?;
    }
    let (handle, window) = resolve(&provider, target).await?;
    let report = MetricsAggregator::new(provider)
        .verify_sla(&handle, &window, &requirements)
        .await?;
    Ok(Output {
        passed: report.meets_sla,
        summary: format!("SLA not met for {}: {}", handle, report.violation_messages().join("; ")),
        body: serde_json::to_value(report)?,
    })
}

pub async fn logs(
    provider: Arc<dyn CloudProvider>,
    target: &Target,
    patterns: &[String],
) -> anyhow::Result<Output> {
    let (handle, window) = resolve(&provider, target).await?;
    let result = ExecutionLogReader::new(provider)
        .contains_any(&handle, &window, patterns)
        .await?;
    Ok(Output::passed(serde_json::to_value(result)?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceReport {
    correlation_id: String,
    complete: bool,
    events: Vec<EventSummary>,
    missing: Vec<Stage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventSummary {
    stage: Stage,
    resource: String,
    timestamp: String,
    source_id: String,
    outcome: EventOutcome,
}

pub struct TraceRequest {
    pub correlation_id: String,
    pub stages: Vec<(Stage, String)>,
    pub lookback_minutes: Option<u64>,
    pub at: Option<DateTime<Utc>>,
}

pub async fn trace(
    provider: Arc<dyn CloudProvider>,
    config: &EngineConfig,
    request: TraceRequest,
) -> anyhow::Result<Output> {
    let locator = ResourceLocator::new(Arc::clone(&provider));
    let mut targets = Vec::with_capacity(request.stages.len());
    for (stage, name) in request.stages {
        let handle = locator.locate(stage.resource_kind(), &name).await?;
        targets.push(StageTarget::new(stage, handle));
    }

    let tracer = CorrelationTracer::from_config(provider, &config.trace);
    let lookback = request
        .lookback_minutes
        .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
        .unwrap_or_else(|| config.trace.lookback());
    let correlation_id = CorrelationId::from(request.correlation_id);
    let outcome = tracer
        .trace_at(
            &correlation_id,
            &targets,
            request.at.unwrap_or_else(Utc::now),
            lookback,
        )
        .await?;

    let complete = outcome.is_complete();
    let events = outcome
        .events()
        .iter()
        .map(|event| EventSummary {
            stage: event.stage,
            resource: event.resource.to_string(),
            timestamp: event.timestamp.to_rfc3339(),
            source_id: event.source_id.clone(),
            outcome: event.outcome.clone(),
        })
        .collect();
    let (missing, summary) = match &outcome {
        TraceOutcome::Complete(_) => (Vec::new(), String::new()),
        TraceOutcome::Partial(partial) => (
            partial.missing.clone(),
            format!("trace for {} incomplete: {}", correlation_id, partial.describe()),
        ),
    };

    let report = TraceReport {
        correlation_id: correlation_id.to_string(),
        complete,
        events,
        missing,
    };
    Ok(Output {
        body: serde_json::to_value(report)?,
        passed: complete,
        summary,
    })
}
