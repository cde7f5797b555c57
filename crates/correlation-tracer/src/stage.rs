//! Pipeline stages and the events that prove a unit of work reached them

use chrono::{DateTime, Utc};
use pipeline_core::{CorrelationId, ResourceHandle, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Invocation,
    StateMachineExecution,
    MessageDelivery,
}

impl Stage {
    /// The kind of resource whose records evidence this stage.
    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Stage::Upload => ResourceKind::Bucket,
            Stage::Invocation => ResourceKind::Function,
            Stage::StateMachineExecution => ResourceKind::StateMachine,
            Stage::MessageDelivery => ResourceKind::Queue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Invocation => "invocation",
            Stage::StateMachineExecution => "state machine execution",
            Stage::MessageDelivery => "message delivery",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "upload" => Ok(Stage::Upload),
            "invocation" | "invoke" => Ok(Stage::Invocation),
            "state_machine_execution" | "state_machine" | "execution" => {
                Ok(Stage::StateMachineExecution)
            }
            "message_delivery" | "message" | "delivery" => Ok(Stage::MessageDelivery),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// An expected stage together with the resource that evidences it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTarget {
    pub stage: Stage,
    pub resource: Arc<ResourceHandle>,
}

impl StageTarget {
    pub fn new(stage: Stage, resource: Arc<ResourceHandle>) -> Self {
        Self { stage, resource }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventOutcome {
    Succeeded,
    Failed { detail: String },
    InProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub stage: Stage,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub resource: Arc<ResourceHandle>,
    pub outcome: EventOutcome,
    /// Provider id of the execution, message or upload that matched.
    pub source_id: String,
}

/// Every expected stage has at least one event, ordered by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub correlation_id: CorrelationId,
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn stages(&self) -> Vec<Stage> {
        self.events.iter().map(|event| event.stage).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event.outcome, EventOutcome::Failed { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialTrace {
    pub correlation_id: CorrelationId,
    pub events: Vec<TraceEvent>,
    pub missing: Vec<Stage>,
}

impl PartialTrace {
    pub fn describe(&self) -> String {
        let missing: Vec<&str> = self.missing.iter().map(Stage::as_str).collect();
        format!(
            "{} of {} stages observed, missing: {}",
            self.events.len(),
            self.events.len() + self.missing.len(),
            missing.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TraceOutcome {
    Complete(Trace),
    Partial(PartialTrace),
}

impl TraceOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TraceOutcome::Complete(_))
    }

    pub fn events(&self) -> &[TraceEvent] {
        match self {
            TraceOutcome::Complete(trace) => &trace.events,
            TraceOutcome::Partial(partial) => &partial.events,
        }
    }
}
