//! In-memory provider for offline verification and tests
//!
//! Holds resources, execution records, state-machine executions and queue
//! messages behind a single lock. Pipelines can be wired so that an upload
//! propagates through a function, a state machine and a queue the way a
//! deployed S3 → Lambda → Step Functions → SQS pipeline would, carrying the
//! object's metadata into every downstream payload.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, VerifyError};
use crate::provider::CloudProvider;
use crate::record::{
    ExecutionStatus, HistoryEvent, QueueMessage, RawExecution, StateMachineExecution, TimeWindow,
};
use crate::resource::{ResourceHandle, ResourceKind};

const ACCOUNT: &str = "000000000000";
const REGION: &str = "local";

/// Identifier the in-memory provider assigns to a named resource.
pub fn local_identifier(kind: ResourceKind, name: &str) -> String {
    match kind {
        ResourceKind::Bucket => format!("arn:aws:s3:::{}", name),
        ResourceKind::Function => format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT, name),
        ResourceKind::StateMachine => format!(
            "arn:aws:states:{}:{}:stateMachine:{}",
            REGION, ACCOUNT, name
        ),
        ResourceKind::Queue => format!("https://sqs.{}.amazonaws.com/{}/{}", REGION, ACCOUNT, name),
    }
}

/// Wiring from a bucket to the downstream resources an upload triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRoute {
    pub bucket: String,
    pub function: String,
    #[serde(default)]
    pub state_machine: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default = "default_function_duration")]
    pub function_duration: Duration,
    /// When set, the function execution fails with this detail and the
    /// pipeline stops there.
    #[serde(default)]
    pub function_failure: Option<String>,
}

fn default_function_duration() -> Duration {
    Duration::from_millis(120)
}

impl PipelineRoute {
    pub fn new(bucket: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            function: function.into(),
            state_machine: None,
            queue: None,
            function_duration: default_function_duration(),
            function_failure: None,
        }
    }

    pub fn then_state_machine(mut self, name: impl Into<String>) -> Self {
        self.state_machine = Some(name.into());
        self
    }

    pub fn then_queue(mut self, name: impl Into<String>) -> Self {
        self.queue = Some(name.into());
        self
    }

    pub fn with_function_duration(mut self, duration: Duration) -> Self {
        self.function_duration = duration;
        self
    }

    pub fn with_function_failure(mut self, detail: impl Into<String>) -> Self {
        self.function_failure = Some(detail.into());
        self
    }
}

/// Serialized provider state, used to replay exported records offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderFixture {
    #[serde(default)]
    pub resources: Vec<FixtureResource>,
    #[serde(default)]
    pub routes: Vec<PipelineRoute>,
}

impl ProviderFixture {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResource {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub executions: Vec<RawExecution>,
    #[serde(default)]
    pub state_machine_executions: Vec<FixtureStateMachineExecution>,
    #[serde(default)]
    pub messages: Vec<QueueMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureStateMachineExecution {
    #[serde(flatten)]
    pub execution: StateMachineExecution,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
}

#[derive(Debug, Default)]
struct ProviderState {
    resources: HashMap<(ResourceKind, String), String>,
    denied: HashMap<(ResourceKind, String), String>,
    executions: HashMap<String, Vec<RawExecution>>,
    state_machine_executions: HashMap<String, Vec<StateMachineExecution>>,
    histories: HashMap<String, Vec<HistoryEvent>>,
    queues: HashMap<String, VecDeque<QueueMessage>>,
    routes: Vec<PipelineRoute>,
}

impl ProviderState {
    fn identifier(&self, resource: &ResourceHandle) -> Result<String> {
        match self
            .resources
            .get(&(resource.kind(), resource.name().to_string()))
        {
            Some(id) if id == resource.resolved_identifier() => Ok(id.clone()),
            _ => Err(VerifyError::NotFound {
                kind: resource.kind(),
                name: resource.name().to_string(),
            }),
        }
    }

    fn require(&self, kind: ResourceKind, name: &str) -> Result<String> {
        self.resources
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| VerifyError::NotFound {
                kind,
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: RwLock<ProviderState>,
    lookups: AtomicUsize,
    pending_failures: AtomicU32,
    sequence: AtomicU64,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: ProviderFixture) -> Result<Self> {
        let provider = Self::new();
        for resource in fixture.resources {
            provider.register(resource.kind, &resource.name);
            for raw in resource.executions {
                provider.record_execution(resource.kind, &resource.name, raw)?;
            }
            for entry in resource.state_machine_executions {
                provider.record_state_machine_execution(
                    &resource.name,
                    entry.execution,
                    entry.history,
                )?;
            }
            if !resource.messages.is_empty() {
                let identifier = local_identifier(resource.kind, &resource.name);
                let mut state = provider.state.write();
                for message in resource.messages {
                    deliver(&mut state, &identifier, message);
                }
            }
        }
        for route in fixture.routes {
            provider.connect(route);
        }
        Ok(provider)
    }

    pub fn with_resource(self, kind: ResourceKind, name: &str) -> Self {
        self.register(kind, name);
        self
    }

    /// Register a resource and return its identifier.
    pub fn register(&self, kind: ResourceKind, name: &str) -> String {
        let identifier = local_identifier(kind, name);
        self.state
            .write()
            .resources
            .insert((kind, name.to_string()), identifier.clone());
        identifier
    }

    /// Drop a resource; existing handles to it become stale.
    pub fn remove(&self, kind: ResourceKind, name: &str) {
        self.state.write().resources.remove(&(kind, name.to_string()));
    }

    pub fn deny(&self, kind: ResourceKind, name: &str, reason: impl Into<String>) {
        self.state
            .write()
            .denied
            .insert((kind, name.to_string()), reason.into());
    }

    /// Make the next `count` record queries fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn connect(&self, route: PipelineRoute) {
        self.state.write().routes.push(route);
    }

    /// Number of `find_resource` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn record_execution(&self, kind: ResourceKind, name: &str, raw: RawExecution) -> Result<()> {
        let mut state = self.state.write();
        let identifier = state.require(kind, name)?;
        state.executions.entry(identifier).or_default().push(raw);
        Ok(())
    }

    pub fn record_state_machine_execution(
        &self,
        name: &str,
        execution: StateMachineExecution,
        history: Vec<HistoryEvent>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let identifier = state.require(ResourceKind::StateMachine, name)?;
        state
            .histories
            .insert(execution.execution_id.clone(), history);
        state
            .state_machine_executions
            .entry(identifier)
            .or_default()
            .push(execution);
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{:06}", prefix, n)
    }

    fn take_failure(&self) -> Result<()> {
        let took = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took {
            return Err(VerifyError::transient("simulated provider throttling"));
        }
        Ok(())
    }

    fn propagate(
        &self,
        state: &mut ProviderState,
        route: &PipelineRoute,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) {
        let Some(function_id) = state
            .resources
            .get(&(ResourceKind::Function, route.function.clone()))
            .cloned()
        else {
            return;
        };

        let correlation = metadata.get(crate::CORRELATION_METADATA_KEY).cloned();
        let event = json!({
            "Records": [{
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": route.bucket },
                    "object": { "key": key },
                },
                "userMetadata": metadata,
            }]
        });
        let request_id = self.next_id("req");
        let previous = state.executions.entry(function_id.clone()).or_default();
        let mut invocation = RawExecution::new(request_id.clone(), Utc::now())
            .finished_after(route.function_duration)
            .with_payload(format!("START RequestId: {} EVENT {}", request_id, event));
        if previous.is_empty() {
            invocation = invocation.cold();
        }
        if let Some(detail) = &route.function_failure {
            invocation = invocation.failed(format!("ERROR {}", detail));
            previous.push(invocation);
            return;
        }
        previous.push(invocation);

        let downstream = json!({
            "bucket": route.bucket,
            "key": key,
            (crate::CORRELATION_FIELD): correlation,
        })
        .to_string();

        if let Some(sm_name) = &route.state_machine {
            if let Some(sm_id) = state
                .resources
                .get(&(ResourceKind::StateMachine, sm_name.clone()))
                .cloned()
            {
                let started = Utc::now();
                let execution_id = format!(
                    "arn:aws:states:{}:{}:execution:{}:{}",
                    REGION,
                    ACCOUNT,
                    sm_name,
                    Uuid::new_v4()
                );
                let history = vec![
                    HistoryEvent {
                        id: 1,
                        timestamp: started,
                        event_type: "ExecutionStarted".to_string(),
                        details: downstream.clone(),
                    },
                    HistoryEvent {
                        id: 2,
                        timestamp: started,
                        event_type: "TaskStateEntered".to_string(),
                        details: String::new(),
                    },
                    HistoryEvent {
                        id: 3,
                        timestamp: Utc::now(),
                        event_type: "ExecutionSucceeded".to_string(),
                        details: String::new(),
                    },
                ];
                state.histories.insert(execution_id.clone(), history);
                state
                    .state_machine_executions
                    .entry(sm_id)
                    .or_default()
                    .push(StateMachineExecution {
                        execution_id: execution_id.clone(),
                        name: execution_id.rsplit(':').next().unwrap_or_default().to_string(),
                        status: ExecutionStatus::Succeeded,
                        start_time: started,
                        stop_time: Some(Utc::now()),
                        input: downstream.clone(),
                        output: Some(downstream.clone()),
                        error: None,
                    });
            }
        }

        if let Some(queue_name) = &route.queue {
            if let Some(queue_id) = state
                .resources
                .get(&(ResourceKind::Queue, queue_name.clone()))
                .cloned()
            {
                self.enqueue(state, &queue_id, downstream);
            }
        }
    }

    fn enqueue(&self, state: &mut ProviderState, queue_id: &str, body: String) {
        let message = QueueMessage {
            message_id: self.next_id("msg"),
            body,
            sent_at: Utc::now(),
        };
        deliver(state, queue_id, message);
    }
}

/// Queue a message and keep its delivery record next to the queue's executions.
fn deliver(state: &mut ProviderState, queue_id: &str, message: QueueMessage) {
    state
        .executions
        .entry(queue_id.to_string())
        .or_default()
        .push(
            RawExecution::new(message.message_id.clone(), message.sent_at)
                .finished_after(Duration::ZERO)
                .with_payload(message.body.clone()),
        );
    state
        .queues
        .entry(queue_id.to_string())
        .or_default()
        .push_back(message);
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    #[instrument(skip(self))]
    async fn find_resource(&self, kind: ResourceKind, name: &str) -> Result<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read();
        if let Some(reason) = state.denied.get(&(kind, name.to_string())) {
            return Err(VerifyError::AccessDenied {
                kind,
                name: name.to_string(),
                reason: reason.clone(),
            });
        }
        state.require(kind, name)
    }

    async fn list_executions(
        &self,
        resource: &ResourceHandle,
        window: &TimeWindow,
    ) -> Result<Vec<RawExecution>> {
        self.take_failure()?;
        let state = self.state.read();
        let identifier = state.identifier(resource)?;
        Ok(state
            .executions
            .get(&identifier)
            .map(|records| {
                records
                    .iter()
                    .filter(|raw| window.contains(raw.start_time))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, content, metadata), fields(bucket = %bucket.name()))]
    async fn upload_artifact(
        &self,
        bucket: &ResourceHandle,
        key: &str,
        content: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.write();
        let identifier = state.identifier(bucket)?;
        let payload = json!({
            "eventName": "ObjectCreated:Put",
            "bucket": bucket.name(),
            "key": key,
            "size": content.len(),
            "metadata": metadata,
        });
        state.executions.entry(identifier).or_default().push(
            RawExecution::new(self.next_id("put"), Utc::now())
                .finished_after(Duration::ZERO)
                .with_payload(payload.to_string()),
        );

        let routes: Vec<PipelineRoute> = state
            .routes
            .iter()
            .filter(|route| route.bucket == bucket.name())
            .cloned()
            .collect();
        for route in &routes {
            debug!(function = %route.function, "propagating upload through pipeline");
            self.propagate(&mut state, route, key, metadata);
        }
        Ok(())
    }

    async fn send_message(&self, queue: &ResourceHandle, body: &str) -> Result<()> {
        let mut state = self.state.write();
        let identifier = state.identifier(queue)?;
        self.enqueue(&mut state, &identifier, body.to_string());
        Ok(())
    }

    async fn receive_message(&self, queue: &ResourceHandle) -> Result<Option<QueueMessage>> {
        self.take_failure()?;
        let mut state = self.state.write();
        let identifier = state.identifier(queue)?;
        Ok(state
            .queues
            .get_mut(&identifier)
            .and_then(|messages| messages.pop_front()))
    }

    async fn list_state_machine_executions(
        &self,
        state_machine: &ResourceHandle,
    ) -> Result<Vec<StateMachineExecution>> {
        self.take_failure()?;
        let state = self.state.read();
        let identifier = state.identifier(state_machine)?;
        Ok(state
            .state_machine_executions
            .get(&identifier)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_execution_history(&self, execution_id: &str) -> Result<Vec<HistoryEvent>> {
        self.state
            .read()
            .histories
            .get(execution_id)
            .cloned()
            .ok_or_else(|| VerifyError::NotFound {
                kind: ResourceKind::StateMachine,
                name: execution_id.to_string(),
            })
    }
}
