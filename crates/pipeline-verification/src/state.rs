//! Typed per-scenario state
//!
//! Every field starts unset. Steps that depend on an earlier step read the
//! field through a `require_*` accessor, which fails with
//! [`VerifyError::PreconditionNotSet`] instead of yielding a default.

use pipeline_core::{ArtifactRef, CorrelationId, QueueMessage, ResourceHandle, Result, VerifyError};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ScenarioState {
    pub bucket: Option<Arc<ResourceHandle>>,
    pub function: Option<Arc<ResourceHandle>>,
    pub state_machine: Option<Arc<ResourceHandle>>,
    pub queue: Option<Arc<ResourceHandle>>,
    pub correlation_id: Option<CorrelationId>,
    pub artifact: Option<ArtifactRef>,
    pub last_message: Option<QueueMessage>,
}

fn require<'a, T>(value: &'a Option<T>, field: &'static str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or(VerifyError::PreconditionNotSet { field })
}

impl ScenarioState {
    pub fn require_bucket(&self) -> Result<&Arc<ResourceHandle>> {
        require(&self.bucket, "bucket")
    }

    pub fn require_function(&self) -> Result<&Arc<ResourceHandle>> {
        require(&self.function, "function")
    }

    pub fn require_state_machine(&self) -> Result<&Arc<ResourceHandle>> {
        require(&self.state_machine, "state_machine")
    }

    pub fn require_queue(&self) -> Result<&Arc<ResourceHandle>> {
        require(&self.queue, "queue")
    }

    pub fn require_correlation_id(&self) -> Result<&CorrelationId> {
        require(&self.correlation_id, "correlation_id")
    }

    pub fn require_artifact(&self) -> Result<&ArtifactRef> {
        require(&self.artifact, "artifact")
    }

    pub fn require_last_message(&self) -> Result<&QueueMessage> {
        require(&self.last_message, "last_message")
    }

    /// Clear everything produced by actions, keeping resolved resources.
    pub fn reset_actions(&mut self) {
        self.correlation_id = None;
        self.artifact = None;
        self.last_message = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::ResourceKind;

    #[test]
    fn unset_fields_fail_fast_with_their_name() {
        let state = ScenarioState::default();
        match state.require_bucket().unwrap_err() {
            VerifyError::PreconditionNotSet { field } => assert_eq!(field, "bucket"),
            other => panic!("unexpected error {:?}", other),
        }
        let err = state.require_correlation_id().unwrap_err();
        assert!(err.to_string().contains("correlation_id"));
    }

    #[test]
    fn reset_keeps_resources() {
        let mut state = ScenarioState {
            queue: Some(Arc::new(ResourceHandle::new(ResourceKind::Queue, "results", "url"))),
            correlation_id: Some(CorrelationId::from("c1")),
            ..Default::default()
        };
        state.reset_actions();
        assert!(state.require_queue().is_ok());
        assert!(state.require_correlation_id().is_err());
    }
}
