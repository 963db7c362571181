use thiserror::Error;

use crate::schedule::EventId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("unrecognized {kind} '{value}'")]
    InvalidArgument { kind: &'static str, value: String },

    #[error("schedule event {0} not found")]
    NotFound(EventId),
}

impl EngineError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(kind: &'static str, value: &str) -> Self {
        Self::InvalidArgument {
            kind,
            value: value.to_string(),
        }
    }

    /// Field name for validation failures, `None` for other kinds.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}
