//! Test doubles for the LLM backend
//!
//! These enable selection and orchestration tests without network I/O.

use crate::llm::{LlmError, LlmErrorKind, LlmRequest, LlmResponse, LlmService, PROBE_PROMPT};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Scripted backend
// ============================================================================

type Scripted = Result<String, LlmErrorKind>;

#[derive(Default)]
struct ModelScript {
    queued: VecDeque<Scripted>,
    fallback: Option<Scripted>,
}

/// Backend whose answers are scripted per model name.
///
/// Queued results are consumed first, then the persistent result (if any)
/// answers every remaining call. Unscripted models answer `NotFound`.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, ModelScript>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(self, model: &str, f: impl FnOnce(&mut ModelScript)) -> Self {
        f(self
            .scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default());
        self
    }

    /// Answer every call to `model` with `text`
    pub fn always(self, model: &str, text: &str) -> Self {
        let text = text.to_string();
        self.script(model, |s| s.fallback = Some(Ok(text)))
    }

    /// Fail every call to `model` with `kind`
    pub fn fail_always(self, model: &str, kind: LlmErrorKind) -> Self {
        self.script(model, |s| s.fallback = Some(Err(kind)))
    }

    /// Answer the next call to `model` with `text`
    pub fn then_reply(self, model: &str, text: &str) -> Self {
        let text = text.to_string();
        self.script(model, |s| s.queued.push_back(Ok(text)))
    }

    /// Fail the next call to `model` with `kind`
    pub fn then_fail(self, model: &str, kind: LlmErrorKind) -> Self {
        self.script(model, |s| s.queued.push_back(Err(kind)))
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmService for ScriptedBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts.get_mut(&request.model).and_then(|s| {
                s.queued.pop_front().or_else(|| s.fallback.clone())
            })
        };

        match next {
            Some(Ok(text)) => Ok(LlmResponse::text(text)),
            Some(Err(kind)) => Err(LlmError::new(kind, format!("scripted {kind:?} for {}", request.model))),
            None => Err(LlmError::not_found(format!("no script for {}", request.model))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Delayed backend (for timeout testing)
// ============================================================================

/// Backend that answers every model after a fixed delay
pub struct DelayedBackend {
    delay: Duration,
    text: String,
    instant_probe: bool,
    calls: Mutex<usize>,
}

impl DelayedBackend {
    pub fn new(delay: Duration, text: &str) -> Self {
        Self {
            delay,
            text: text.to_string(),
            instant_probe: false,
            calls: Mutex::new(0),
        }
    }

    /// Answer selection probes immediately; only real turns are slow
    pub fn instant_probe(mut self) -> Self {
        self.instant_probe = true;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmService for DelayedBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        *self.calls.lock().unwrap() += 1;
        let is_probe = matches!(request.messages.as_slice(), [only] if only.content() == PROBE_PROMPT);
        if !(self.instant_probe && is_probe) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(LlmResponse::text(self.text.clone()))
    }

    fn name(&self) -> &str {
        "delayed"
    }
}
