//! # Pipeline Metrics
//!
//! Turns execution records into counts, durations and error rates over a
//! time window, and checks them against SLA thresholds. An empty window is
//! reported as "no data" and never satisfies an SLA.

pub mod aggregator;
pub mod sla;
pub mod summary;

pub use aggregator::MetricsAggregator;
pub use sla::{evaluate_sla, SlaMetric, SlaReport, SlaRequirements, SlaViolation};
pub use summary::{nearest_rank, summarize, ExecutionMetrics};
