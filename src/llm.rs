//! LLM backend abstraction
//!
//! One backend serves many model names; the model is chosen per request.
//! Candidate selection and failure classification live alongside.

mod candidates;
mod error;
mod gemini;
mod selector;
mod types;

pub use candidates::{
    by_priority, ModelCandidate, Profile, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT,
};
pub use error::{LlmError, LlmErrorKind};
pub use gemini::GeminiService;
pub use selector::{
    ActiveModel, ActiveModelStatus, AttemptOutcome, AttemptRecord, Backoff, ModelHandle,
    ModelSelector, SelectionError, SelectionReport,
};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM backends
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request against `request.model`
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Logging wrapper for LLM backends
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    backend = %self.inner.name(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.inner.name(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
