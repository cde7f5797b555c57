//! Aggregation of execution records into numeric metrics

use pipeline_core::ExecutionRecord;
use serde::{Deserialize, Serialize};

/// Aggregated view of the executions in one window.
///
/// With no records every duration and rate field is `None`: there is no
/// evidence of activity, and consumers must not read that as success.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub execution_count: usize,
    pub errors: usize,
    /// Mean over records with a defined duration.
    pub average_duration_ms: Option<f64>,
    pub cold_starts: usize,
    pub max_duration_ms: Option<u64>,
    /// Nearest-rank 95th percentile.
    pub p95_duration_ms: Option<u64>,
    pub error_rate: Option<f64>,
}

impl ExecutionMetrics {
    pub fn has_data(&self) -> bool {
        self.execution_count > 0
    }
}

pub fn summarize(records: &[ExecutionRecord]) -> ExecutionMetrics {
    let execution_count = records.len();
    let errors = records.iter().filter(|record| !record.succeeded()).count();
    let cold_starts = records.iter().filter(|record| record.cold_start()).count();

    let mut durations: Vec<u64> = records
        .iter()
        .filter_map(|record| record.duration_ms())
        .collect();
    durations.sort_unstable();

    let average_duration_ms = if durations.is_empty() {
        None
    } else {
        let total: u128 = durations.iter().map(|&d| u128::from(d)).sum();
        Some(total as f64 / durations.len() as f64)
    };

    ExecutionMetrics {
        execution_count,
        errors,
        average_duration_ms,
        cold_starts,
        max_duration_ms: durations.last().copied(),
        p95_duration_ms: nearest_rank(&durations, 95),
        error_rate: (execution_count > 0).then(|| errors as f64 / execution_count as f64),
    }
}

/// Nearest-rank percentile of an ascending slice.
pub fn nearest_rank(sorted: &[u64], percentile: u32) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let percentile = percentile.clamp(1, 100) as usize;
    let rank = (percentile * sorted.len()).div_ceil(100);
    sorted.get(rank.saturating_sub(1)).copied()
}
