//! Execution records and the provider-native shapes they are built from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::correlation::CorrelationId;
use crate::resource::ResourceHandle;

/// Inclusive time range used to scope record queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The window `[now - lookback, now]`.
    pub fn last(lookback: Duration) -> Self {
        Self::ending_at(Utc::now(), lookback)
    }

    pub fn last_minutes(minutes: u64) -> Self {
        Self::last(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        let start = end
            .checked_sub_signed(to_time_delta(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    /// Push the end of the window forward to absorb cross-provider clock skew.
    pub fn extended_by(self, skew: Duration) -> Self {
        let end = self
            .end
            .checked_add_signed(to_time_delta(skew))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            start: self.start,
            end,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

fn to_time_delta(duration: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}

/// One execution or log entry as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExecution {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_succeeded")]
    pub succeeded: bool,
    #[serde(default)]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub cold_start: bool,
    #[serde(default)]
    pub payload: String,
}

fn default_succeeded() -> bool {
    true
}

impl RawExecution {
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_time: None,
            succeeded: true,
            error_detail: None,
            cold_start: false,
            payload: String::new(),
        }
    }

    pub fn finished_after(mut self, duration: Duration) -> Self {
        self.end_time = self.start_time.checked_add_signed(to_time_delta(duration));
        self
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.succeeded = false;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn cold(mut self) -> Self {
        self.cold_start = true;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A normalized, read-only execution record for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    resource: Arc<ResourceHandle>,
    execution_id: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
    succeeded: bool,
    error_detail: Option<String>,
    cold_start: bool,
    raw_payload: String,
}

impl ExecutionRecord {
    pub fn from_raw(resource: Arc<ResourceHandle>, raw: RawExecution) -> Self {
        let duration_ms = raw.end_time.and_then(|end| {
            let millis = (end - raw.start_time).num_milliseconds();
            u64::try_from(millis).ok()
        });
        Self {
            resource,
            execution_id: raw.id,
            start_time: raw.start_time,
            end_time: raw.end_time,
            duration_ms,
            succeeded: raw.succeeded,
            error_detail: raw.error_detail,
            cold_start: raw.cold_start,
            raw_payload: raw.payload,
        }
    }

    pub fn resource(&self) -> &Arc<ResourceHandle> {
        &self.resource
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// `None` while the execution is still running or the end is unknown.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn cold_start(&self) -> bool {
        self.cold_start
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// Case-sensitive substring search over the payload and error detail.
    pub fn mentions(&self, needle: &str) -> bool {
        self.raw_payload.contains(needle)
            || self
                .error_detail
                .as_deref()
                .is_some_and(|detail| detail.contains(needle))
    }

    /// Whether the payload or error detail carries `correlation_id` as a token.
    pub fn mentions_id(&self, correlation_id: &CorrelationId) -> bool {
        correlation_id.appears_in(&self.raw_payload)
            || self
                .error_detail
                .as_deref()
                .is_some_and(|detail| correlation_id.appears_in(detail))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineExecution {
    pub execution_id: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StateMachineExecution {
    pub fn to_raw(&self) -> RawExecution {
        RawExecution {
            id: self.execution_id.clone(),
            start_time: self.start_time,
            end_time: self.stop_time,
            succeeded: !self.status.is_failure(),
            error_detail: self.error.clone(),
            cold_start: false,
            payload: self.input.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use proptest::prelude::*;

    fn handle() -> Arc<ResourceHandle> {
        Arc::new(ResourceHandle::new(
            ResourceKind::Function,
            "processor",
            "arn:aws:lambda:local:000000000000:function:processor",
        ))
    }

    #[test]
    fn duration_derived_from_start_and_end() {
        let start = Utc::now();
        let raw = RawExecution::new("req-1", start).finished_after(Duration::from_millis(250));
        let record = ExecutionRecord::from_raw(handle(), raw);
        assert_eq!(record.duration_ms(), Some(250));
    }

    #[test]
    fn running_execution_has_no_duration() {
        let record = ExecutionRecord::from_raw(handle(), RawExecution::new("req-2", Utc::now()));
        assert_eq!(record.duration_ms(), None);
    }

    #[test]
    fn mentions_is_case_sensitive_and_checks_error_detail() {
        let raw = RawExecution::new("req-3", Utc::now())
            .with_payload("START RequestId: req-3")
            .failed("Unhandled Exception: boom");
        let record = ExecutionRecord::from_raw(handle(), raw);
        assert!(record.mentions("Exception"));
        assert!(!record.mentions("exception"));
        assert!(record.mentions("RequestId"));
    }

    #[test]
    fn mentions_id_ignores_longer_ids_sharing_a_prefix() {
        let raw = RawExecution::new("req-4", Utc::now())
            .with_payload(r#"EVENT {"correlation_id":"c10"}"#);
        let record = ExecutionRecord::from_raw(handle(), raw);
        assert!(record.mentions("c1"));
        assert!(!record.mentions_id(&CorrelationId::from("c1")));
        assert!(record.mentions_id(&CorrelationId::from("c10")));
    }

    #[test]
    fn window_normalizes_reversed_bounds() {
        let now = Utc::now();
        let earlier = now - chrono::TimeDelta::seconds(10);
        let window = TimeWindow::new(now, earlier);
        assert_eq!(window.start, earlier);
        assert_eq!(window.end, now);
    }

    proptest! {
        #[test]
        fn window_contains_only_instants_within_lookback(offset_secs in 0i64..7200, lookback_secs in 1u64..3600) {
            let end = Utc::now();
            let window = TimeWindow::ending_at(end, Duration::from_secs(lookback_secs));
            let instant = end - chrono::TimeDelta::seconds(offset_secs);
            prop_assert_eq!(window.contains(instant), offset_secs as u64 <= lookback_secs);
        }
    }
}
