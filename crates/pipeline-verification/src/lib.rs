//! # Pipeline Verification
//!
//! The surface step definitions call. A [`ScenarioContext`] is built per
//! scenario and carries typed state between steps; [`Verifier`] exposes the
//! named checks ("was invoked", "invoked N times within M minutes", "has no
//! errors", "SLA met", "pipeline completed"). Errors are never masked: a
//! failed check reports the resource or correlation id, the policy and the
//! last observed state.

pub mod context;
pub mod registry;
pub mod state;
pub mod verifier;

pub use context::ScenarioContext;
pub use registry::StepRegistry;
pub use state::ScenarioState;
pub use verifier::Verifier;

pub use condition_poller::{ConditionPoller, Polled, Probe};
pub use correlation_tracer::{CorrelationTracer, Stage, StageTarget, Trace, TraceOutcome};
pub use pipeline_metrics::{ExecutionMetrics, MetricsAggregator, SlaMetric, SlaReport, SlaRequirements};
