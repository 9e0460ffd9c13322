//! Common types for LLM interactions

use super::ModelCandidate;
use crate::conversation::Message;
use std::time::Duration;

/// Prompt used to check that a candidate answers at all
pub const PROBE_PROMPT: &str = "Hi";

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overall bound for the call, retries included
    pub timeout: Duration,
    /// Extra attempts for retryable failures
    pub max_retries: u32,
}

impl LlmRequest {
    pub fn for_candidate(candidate: &ModelCandidate, messages: Vec<Message>) -> Self {
        Self {
            model: candidate.name.clone(),
            messages,
            temperature: candidate.temperature,
            max_tokens: candidate.max_tokens,
            timeout: candidate.timeout,
            max_retries: candidate.max_retries,
        }
    }

    /// Lightweight single-message request used during selection
    pub fn probe(candidate: &ModelCandidate) -> Self {
        Self::for_candidate(candidate, vec![Message::user(PROBE_PROMPT)])
    }
}

/// LLM response
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: Usage::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
