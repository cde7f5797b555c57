//! Counting, summarizing and SLA evaluation over a window of execution records

use pipeline_core::{
    CloudProvider, ExecutionLogReader, ExecutionRecord, ResourceHandle, Result, TimeWindow,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::sla::{evaluate_sla, SlaReport, SlaRequirements};
use crate::summary::{summarize, ExecutionMetrics};

/// Counts and metrics over a resource's execution records.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    reader: ExecutionLogReader,
}

impl MetricsAggregator {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self::from_reader(ExecutionLogReader::new(provider))
    }

    pub fn from_reader(reader: ExecutionLogReader) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &ExecutionLogReader {
        &self.reader
    }

    pub async fn records(
        &self,
        handle: &Arc<ResourceHandle>,
        window: &TimeWindow,
    ) -> Result<Vec<ExecutionRecord>> {
        self.reader.read(handle, window).await
    }

    pub async fn count(&self, handle: &Arc<ResourceHandle>, window: &TimeWindow) -> Result<usize> {
        let count = self.reader.read(handle, window).await?.len();
        debug!(resource = %handle, count, "counted executions");
        Ok(count)
    }

    /// Executions started within the last `minutes` minutes.
    pub async fn count_since(&self, handle: &Arc<ResourceHandle>, minutes: u64) -> Result<usize> {
        self.count(handle, &TimeWindow::last_minutes(minutes)).await
    }

    #[instrument(skip(self, handle, window), fields(resource = %handle))]
    pub async fn metrics(
        &self,
        handle: &Arc<ResourceHandle>,
        window: &TimeWindow,
    ) -> Result<ExecutionMetrics> {
        let records = self.reader.read(handle, window).await?;
        let metrics = summarize(&records);
        if !metrics.has_data() {
            debug!("no executions in window");
        }
        Ok(metrics)
    }

    #[instrument(skip(self, handle, window, requirements), fields(resource = %handle))]
    pub async fn verify_sla(
        &self,
        handle: &Arc<ResourceHandle>,
        window: &TimeWindow,
        requirements: &SlaRequirements,
    ) -> Result<SlaReport> {
        let metrics = self.metrics(handle, window).await?;
        let report = evaluate_sla(&metrics, requirements);
        if report.meets_sla {
            info!(executions = metrics.execution_count, "SLA met");
        } else {
            warn!(violations = ?report.violation_messages(), "SLA violated");
        }
        Ok(report)
    }
}
