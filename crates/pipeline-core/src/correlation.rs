//! Correlation identifiers and the artifacts they are attached to

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::resource::ResourceKind;

/// Opaque token tying one unit of work to every downstream record it causes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh random id, unique across the test run.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `text` carries this id as a whole token.
    ///
    /// An occurrence only counts when it is not flanked by another id
    /// character, so `c1` is not found inside `c10` or `abc1`.
    pub fn appears_in(&self, text: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        text.match_indices(self.0.as_str()).any(|(at, found)| {
            let before = text[..at].chars().next_back();
            let after = text[at + found.len()..].chars().next();
            !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
        })
    }
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The artifact a correlation id was attached to: an object in a bucket or a
/// message sent to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub container_kind: ResourceKind,
    pub container: String,
    pub key: String,
}

impl ArtifactRef {
    pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container_kind: ResourceKind::Bucket,
            container: bucket.into(),
            key: key.into(),
        }
    }

    pub fn message(queue: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container_kind: ResourceKind::Queue,
            container: queue.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.container_kind {
            ResourceKind::Bucket => write!(f, "s3://{}/{}", self.container, self.key),
            kind => write!(f, "{} {}/{}", kind, self.container, self.key),
        }
    }
}
