//! Execution Log Reader
//!
//! Fetches execution and log records for a resolved resource and normalizes
//! them into [`ExecutionRecord`]s ordered by start time. State machines are
//! read through their execution listing; every other kind through the
//! provider's execution/log API.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::provider::CloudProvider;
use crate::record::{ExecutionRecord, RawExecution, TimeWindow};
use crate::resource::{ResourceHandle, ResourceKind};

/// Result of a "contains any of" log search.
///
/// `matches` lists the patterns that occurred at least once, in the order
/// the caller supplied them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogMatch {
    pub found: bool,
    pub matches: Vec<String>,
}

#[derive(Clone)]
pub struct ExecutionLogReader {
    provider: Arc<dyn CloudProvider>,
}

impl std::fmt::Debug for ExecutionLogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLogReader").finish_non_exhaustive()
    }
}

impl ExecutionLogReader {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Records whose start time falls inside `window`, oldest first.
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn read(
        &self,
        resource: &Arc<ResourceHandle>,
        window: &TimeWindow,
    ) -> Result<Vec<ExecutionRecord>> {
        let raw: Vec<RawExecution> = match resource.kind() {
            ResourceKind::StateMachine => self
                .provider
                .list_state_machine_executions(resource)
                .await?
                .iter()
                .map(|execution| execution.to_raw())
                .collect(),
            _ => self.provider.list_executions(resource, window).await?,
        };

        let mut records: Vec<ExecutionRecord> = raw
            .into_iter()
            .filter(|entry| window.contains(entry.start_time))
            .map(|entry| ExecutionRecord::from_raw(Arc::clone(resource), entry))
            .collect();
        records.sort_by_key(|record| record.start_time());
        debug!(count = records.len(), "read execution records");
        Ok(records)
    }

    /// Case-sensitive substring search for any of `patterns` across the
    /// window's records. Callers wanting case-insensitive matching normalize
    /// both sides beforehand.
    pub async fn contains_any<S: AsRef<str>>(
        &self,
        resource: &Arc<ResourceHandle>,
        window: &TimeWindow,
        patterns: &[S],
    ) -> Result<LogMatch> {
        let records = self.read(resource, window).await?;
        Ok(match_patterns(&records, patterns))
    }
}

pub fn match_patterns<S: AsRef<str>>(records: &[ExecutionRecord], patterns: &[S]) -> LogMatch {
    let mut matches: Vec<String> = Vec::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        if pattern.is_empty() || matches.iter().any(|seen| seen == pattern) {
            continue;
        }
        if records.iter().any(|record| record.mentions(pattern)) {
            matches.push(pattern.to_string());
        }
    }
    LogMatch {
        found: !matches.is_empty(),
        matches,
    }
}
