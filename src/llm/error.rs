//! LLM error types

use serde::Serialize;
use thiserror::Error;

/// Backend failure with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unavailable, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::MalformedResponse, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    /// Service unavailable, overloaded or rate limited - retryable
    Unavailable,
    /// Credentials rejected for this model - skip the candidate
    PermissionDenied,
    /// Model does not exist - skip the candidate
    NotFound,
    /// No answer within the candidate's timeout - retryable
    Timeout,
    /// Empty or missing content - retryable
    MalformedResponse,
    /// Request rejected as invalid - skip the candidate
    InvalidRequest,
    /// Anything else - skip the candidate
    Unknown,
}

impl LlmErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Timeout | Self::MalformedResponse
        )
    }
}
