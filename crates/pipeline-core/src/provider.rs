//! The boundary between the verification engine and a cloud provider
//!
//! Implementations wrap an SDK (or an in-memory fake) and must map provider
//! failures onto [`VerifyError`](crate::VerifyError): missing resources to
//! `NotFound`, permission failures to `AccessDenied`, throttling and network
//! blips to `Transient`.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::record::{HistoryEvent, QueueMessage, RawExecution, StateMachineExecution, TimeWindow};
use crate::resource::{ResourceHandle, ResourceKind};

#[async_trait]
pub trait CloudProvider: Send + Sync + std::fmt::Debug {
    /// Resolve a name to the provider identifier (ARN, queue URL).
    async fn find_resource(&self, kind: ResourceKind, name: &str) -> Result<String>;

    /// Execution or log entries for a resource within `window`, in any order.
    async fn list_executions(
        &self,
        resource: &ResourceHandle,
        window: &TimeWindow,
    ) -> Result<Vec<RawExecution>>;

    async fn upload_artifact(
        &self,
        bucket: &ResourceHandle,
        key: &str,
        content: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> Result<()>;

    async fn send_message(&self, queue: &ResourceHandle, body: &str) -> Result<()>;

    async fn receive_message(&self, queue: &ResourceHandle) -> Result<Option<QueueMessage>>;

    async fn list_state_machine_executions(
        &self,
        state_machine: &ResourceHandle,
    ) -> Result<Vec<StateMachineExecution>>;

    async fn get_execution_history(&self, execution_id: &str) -> Result<Vec<HistoryEvent>>;
}
