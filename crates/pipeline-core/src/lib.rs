//! # Pipeline Core
//!
//! Core types, the provider boundary and resource/record access for verifying
//! event-driven pipelines (object storage → function → state machine → queue).
//!
//! ## Components
//! - [`ResourceLocator`] resolves names to cached [`ResourceHandle`]s
//! - [`ExecutionLogReader`] fetches time-windowed [`ExecutionRecord`]s
//! - [`CloudProvider`] is the only seam to the outside world; an
//!   [`InMemoryProvider`] backs offline runs and tests

pub mod config;
pub mod correlation;
pub mod error;
pub mod locator;
pub mod log_reader;
pub mod memory;
pub mod policy;
pub mod provider;
pub mod record;
pub mod resource;

pub use config::{BackoffKind, EngineConfig, LogConfig, PollConfig, TraceConfig, VerificationConfig};
pub use correlation::{ArtifactRef, CorrelationId};
pub use error::{Result, VerifyError};
pub use locator::ResourceLocator;
pub use log_reader::{match_patterns, ExecutionLogReader, LogMatch};
pub use memory::{InMemoryProvider, PipelineRoute, ProviderFixture};
pub use policy::{Backoff, ExponentialBackoff, FixedBackoff, PollPolicy};
pub use provider::CloudProvider;
pub use record::{
    ExecutionRecord, ExecutionStatus, HistoryEvent, QueueMessage, RawExecution,
    StateMachineExecution, TimeWindow,
};
pub use resource::{ResourceHandle, ResourceKind};

/// Current crate version for compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information for logs and CLI output
pub const BUILD_INFO: &str = concat!(
    "pipeline-verify ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);

/// Object metadata key carrying the correlation id on uploads.
pub const CORRELATION_METADATA_KEY: &str = "correlation-id";

/// JSON field carrying the correlation id in message envelopes.
pub const CORRELATION_FIELD: &str = "correlation_id";
