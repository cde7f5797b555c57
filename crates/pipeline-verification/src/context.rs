//! Per-scenario context
//!
//! One [`ScenarioContext`] is built for each scenario and handed to every
//! step. It owns the scenario's handle cache, correlation attachments, poll
//! policy and typed state; nothing is shared between scenarios except the
//! provider itself.

use condition_poller::ConditionPoller;
use correlation_tracer::{CorrelationTracer, Stage, StageTarget};
use pipeline_core::{
    ArtifactRef, CloudProvider, CorrelationId, EngineConfig, PollPolicy, QueueMessage,
    ResourceHandle, ResourceKind, ResourceLocator, Result, CORRELATION_FIELD,
    CORRELATION_METADATA_KEY,
};
use pipeline_metrics::MetricsAggregator;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::state::ScenarioState;
use crate::verifier::Verifier;

pub struct ScenarioContext {
    config: EngineConfig,
    provider: Arc<dyn CloudProvider>,
    locator: ResourceLocator,
    tracer: CorrelationTracer,
    aggregator: MetricsAggregator,
    poller: ConditionPoller,
    state: ScenarioState,
}

impl std::fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("locator", &self.locator)
            .field("tracer", &self.tracer)
            .field("policy", self.poller.policy())
            .field("state", &self.state)
            .finish()
    }
}

impl ScenarioContext {
    pub fn new(provider: Arc<dyn CloudProvider>, config: EngineConfig) -> Result<Self> {
        let policy = config.poll_policy()?;
        Ok(Self {
            locator: ResourceLocator::new(Arc::clone(&provider)),
            tracer: CorrelationTracer::from_config(Arc::clone(&provider), &config.trace),
            aggregator: MetricsAggregator::new(Arc::clone(&provider)),
            poller: ConditionPoller::new(policy),
            provider,
            config,
            state: ScenarioState::default(),
        })
    }

    /// Replace the scenario's default poll policy.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.poller = ConditionPoller::new(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    pub fn tracer(&self) -> &CorrelationTracer {
        &self.tracer
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn poller(&self) -> &ConditionPoller {
        &self.poller
    }

    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ScenarioState {
        &mut self.state
    }

    pub fn verifier(&self) -> Verifier<'_> {
        Verifier::new(self)
    }

    pub async fn locate(&self, kind: ResourceKind, name: &str) -> Result<Arc<ResourceHandle>> {
        self.locator.locate(kind, name).await
    }

    /// Resolve `name` and remember it as the scenario's resource of that kind.
    pub async fn use_resource(&mut self, kind: ResourceKind, name: &str) -> Result<Arc<ResourceHandle>> {
        let handle = self.locator.locate(kind, name).await?;
        let slot = match kind {
            ResourceKind::Bucket => &mut self.state.bucket,
            ResourceKind::Function => &mut self.state.function,
            ResourceKind::StateMachine => &mut self.state.state_machine,
            ResourceKind::Queue => &mut self.state.queue,
        };
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Upload `content` to the scenario bucket under a fresh correlation id.
    pub async fn upload_artifact(&mut self, key: &str, content: &[u8]) -> Result<CorrelationId> {
        let correlation_id = CorrelationId::generate();
        self.upload_artifact_with_id(key, content, correlation_id.clone())
            .await?;
        Ok(correlation_id)
    }

    /// Attach `correlation_id` to the object, then upload it with the id in
    /// its metadata.
    #[instrument(skip(self, content), fields(correlation_id = %correlation_id))]
    pub async fn upload_artifact_with_id(
        &mut self,
        key: &str,
        content: &[u8],
        correlation_id: CorrelationId,
    ) -> Result<()> {
        let bucket = Arc::clone(self.state.require_bucket()?);
        let artifact = ArtifactRef::object(bucket.name(), key);
        self.tracer.attach(artifact.clone(), &correlation_id)?;

        let metadata = BTreeMap::from([(
            CORRELATION_METADATA_KEY.to_string(),
            correlation_id.to_string(),
        )]);
        self.provider
            .upload_artifact(&bucket, key, content, &metadata)
            .await?;
        info!(%artifact, bytes = content.len(), "uploaded artifact");

        self.state.correlation_id = Some(correlation_id);
        self.state.artifact = Some(artifact);
        Ok(())
    }

    /// Send `body` to the scenario queue inside an envelope carrying a fresh
    /// correlation id.
    #[instrument(skip(self, body))]
    pub async fn send_message(&mut self, body: serde_json::Value) -> Result<CorrelationId> {
        let queue = Arc::clone(self.state.require_queue()?);
        let correlation_id = CorrelationId::generate();
        let artifact = ArtifactRef::message(queue.name(), correlation_id.as_str());
        self.tracer.attach(artifact.clone(), &correlation_id)?;

        let envelope = json!({
            (CORRELATION_FIELD): correlation_id.as_str(),
            "body": body,
        });
        self.provider
            .send_message(&queue, &envelope.to_string())
            .await?;
        info!(%artifact, "sent message");

        self.state.correlation_id = Some(correlation_id.clone());
        self.state.artifact = Some(artifact);
        Ok(correlation_id)
    }

    /// Pop one message from the scenario queue, remembering it when present.
    pub async fn receive_message(&mut self) -> Result<Option<QueueMessage>> {
        let queue = Arc::clone(self.state.require_queue()?);
        let message = self.provider.receive_message(&queue).await?;
        match &message {
            Some(received) => {
                debug!(message_id = received.message_id.as_str(), "received message");
                self.state.last_message = Some(received.clone());
            }
            None => debug!("queue empty"),
        }
        Ok(message)
    }

    /// Stages implied by the resources this scenario has resolved, in
    /// causal order.
    pub fn expected_stages(&self) -> Vec<StageTarget> {
        [
            (Stage::Upload, &self.state.bucket),
            (Stage::Invocation, &self.state.function),
            (Stage::StateMachineExecution, &self.state.state_machine),
            (Stage::MessageDelivery, &self.state.queue),
        ]
        .into_iter()
        .filter_map(|(stage, handle)| {
            handle
                .as_ref()
                .map(|handle| StageTarget::new(stage, Arc::clone(handle)))
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::{InMemoryProvider, VerifyError};

    fn provider() -> Arc<InMemoryProvider> {
        Arc::new(
            InMemoryProvider::new()
                .with_resource(ResourceKind::Bucket, "uploads")
                .with_resource(ResourceKind::Function, "processor")
                .with_resource(ResourceKind::Queue, "results"),
        )
    }

    #[tokio::test]
    async fn upload_requires_a_bucket_first() {
        let mut ctx = ScenarioContext::new(provider(), EngineConfig::default()).unwrap();
        let err = ctx.upload_artifact("file.json", b"{}").await.unwrap_err();
        assert!(matches!(err, VerifyError::PreconditionNotSet { field: "bucket" }));
    }

    #[tokio::test]
    async fn upload_attaches_id_before_dispatch() {
        let mut ctx = ScenarioContext::new(provider(), EngineConfig::default()).unwrap();
        ctx.use_resource(ResourceKind::Bucket, "uploads").await.unwrap();
        let id = ctx.upload_artifact("file.json", b"{}").await.unwrap();

        assert_eq!(ctx.state().require_correlation_id().unwrap(), &id);
        assert_eq!(
            ctx.tracer().artifact_for(&id),
            Some(ArtifactRef::object("uploads", "file.json"))
        );
    }

    #[tokio::test]
    async fn message_round_trip_carries_correlation_id() {
        let mut ctx = ScenarioContext::new(provider(), EngineConfig::default()).unwrap();
        ctx.use_resource(ResourceKind::Queue, "results").await.unwrap();
        let id = ctx.send_message(json!({"order": 42})).await.unwrap();

        let message = ctx.receive_message().await.unwrap().unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&message.body).unwrap();
        assert_eq!(envelope[CORRELATION_FIELD], id.as_str());
        assert_eq!(envelope["body"]["order"], 42);
        assert!(ctx.receive_message().await.unwrap().is_none());
        assert_eq!(ctx.state().require_last_message().unwrap().message_id, message.message_id);
    }

    #[tokio::test]
    async fn expected_stages_follow_resolved_resources() {
        let mut ctx = ScenarioContext::new(provider(), EngineConfig::default()).unwrap();
        ctx.use_resource(ResourceKind::Queue, "results").await.unwrap();
        ctx.use_resource(ResourceKind::Bucket, "uploads").await.unwrap();
        let stages: Vec<Stage> = ctx.expected_stages().iter().map(|t| t.stage).collect();
        assert_eq!(stages, vec![Stage::Upload, Stage::MessageDelivery]);
    }

    #[tokio::test]
    async fn contexts_do_not_share_handles() {
        let shared = provider();
        let a = ScenarioContext::new(shared.clone(), EngineConfig::default()).unwrap();
        let b = ScenarioContext::new(shared.clone(), EngineConfig::default()).unwrap();
        a.locate(ResourceKind::Function, "processor").await.unwrap();
        assert_eq!(a.locator().cached_count(), 1);
        assert_eq!(b.locator().cached_count(), 0);
    }
}
