//! Error types for pipeline verification

use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceKind;

pub type Result<T> = std::result::Result<T, VerifyError>;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("Access denied to {kind} '{name}': {reason}")]
    AccessDenied {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error(
        "Timed out waiting for {condition} after {elapsed:?} \
         ({attempts} attempts, timeout {timeout:?}, interval {interval:?}); \
         last observed: {last_observed}"
    )]
    Timeout {
        condition: String,
        elapsed: Duration,
        attempts: u32,
        timeout: Duration,
        interval: Duration,
        last_observed: String,
    },

    #[error(
        "Out-of-order trace for correlation id {correlation_id}: \
         {stage} observed without a preceding {missing} event"
    )]
    OutOfOrderTrace {
        correlation_id: String,
        stage: String,
        missing: String,
    },

    #[error("Transient provider error: {reason}")]
    Transient { reason: String },

    #[error("Assertion failed for {resource}: {check} (observed {observed})")]
    AssertionFailed {
        check: String,
        resource: String,
        observed: String,
    },

    #[error("Precondition not set: {field}")]
    PreconditionNotSet { field: &'static str },

    #[error("Invalid poll policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("Invalid trace request: {reason}")]
    InvalidTrace { reason: String },

    #[error("Correlation id {correlation_id} is already attached to {artifact}")]
    CorrelationConflict {
        correlation_id: String,
        artifact: String,
    },

    #[error("Invalid config value for '{field}': {reason}")]
    Config { field: String, reason: String },

    #[error("Serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Whether a poller may treat this error as "condition not yet true".
    ///
    /// Only provider blips are retried. Missing resources, permission
    /// failures and trace anomalies abort the poll immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// True for the primary "pipeline too slow / never happened" signal.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
