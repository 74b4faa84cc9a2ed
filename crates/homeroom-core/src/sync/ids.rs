// Context and learner identifiers.
// Context format: "ctx-<uuid>"

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CONTEXT_ID_PREFIX: &str = "ctx-";

/// Error type for identifier parsing
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Invalid context ID format: {0}")]
    InvalidContextId(String),

    #[error("Learner ID must not be empty")]
    EmptyLearnerId,
}

/// Opaque identity of one open context (tab, window, process).
///
/// Ordering is used only to break leadership ties between equal sequences.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Fresh random id in format "ctx-<uuid>".
    pub fn generate() -> Self {
        Self(format!("{}{}", CONTEXT_ID_PREFIX, Uuid::new_v4()))
    }

    /// Parse an existing id. Anything after the prefix is accepted.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let raw = raw.trim();
        match raw.strip_prefix(CONTEXT_ID_PREFIX) {
            Some(rest) if !rest.is_empty() => Ok(Self(raw.to_string())),
            _ => Err(IdError::InvalidContextId(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of the per-learner session record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyLearnerId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
