//! Resource kinds and resolved handles

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Function,
    StateMachine,
    Queue,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::Function => "function",
            ResourceKind::StateMachine => "state machine",
            ResourceKind::Queue => "queue",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "bucket" | "s3" => Ok(ResourceKind::Bucket),
            "function" | "lambda" => Ok(ResourceKind::Function),
            "state_machine" | "statemachine" | "step_function" | "sfn" => {
                Ok(ResourceKind::StateMachine)
            }
            "queue" | "sqs" => Ok(ResourceKind::Queue),
            other => Err(format!("unknown resource kind: {}", other)),
        }
    }
}

/// A named cloud resource resolved to its provider identifier.
///
/// Handles are created by the [`ResourceLocator`](crate::ResourceLocator) and
/// shared as `Arc<ResourceHandle>`; the identifier never changes once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    kind: ResourceKind,
    name: String,
    resolved_identifier: String,
}

impl ResourceHandle {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        resolved_identifier: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            resolved_identifier: resolved_identifier.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolved_identifier(&self) -> &str {
        &self.resolved_identifier
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}
