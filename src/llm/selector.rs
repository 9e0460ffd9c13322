//! Ordered candidate selection with failure classification
//!
//! Candidates are probed one at a time in priority order. The first
//! non-empty probe response commits the handle. Retryable failures are
//! retried on the same candidate with exponential backoff; everything else
//! skips the candidate for good.

use super::candidates::by_priority;
use super::{LlmError, LlmErrorKind, LlmRequest, LlmResponse, LlmService, ModelCandidate};
use crate::conversation::Message;
use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Exponential backoff between attempts on one candidate
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(8),
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base... plus up to 10% jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.max);
        let jitter_ceiling = u64::try_from(exp.as_millis() / 10).unwrap_or(0);
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Result of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed {
        kind: LlmErrorKind,
        /// Backend detail; kept out of serialized reports
        #[serde(skip)]
        message: String,
    },
}

/// One probe attempt during selection
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub model: String,
    /// 1-based attempt number for this candidate
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Everything that happened during one selection run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionReport {
    pub attempts: Vec<AttemptRecord>,
    pub selected: Option<String>,
}

impl SelectionReport {
    pub fn attempts_for(&self, model: &str) -> usize {
        self.attempts.iter().filter(|a| a.model == model).count()
    }

    fn record(&mut self, model: &str, attempt: u32, outcome: AttemptOutcome, elapsed: Duration) {
        self.attempts.push(AttemptRecord {
            model: model.to_string(),
            attempt,
            outcome,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no available model: all candidates exhausted after {} attempts", .0.attempts.len())]
    NoAvailableModel(SelectionReport),
}

impl SelectionError {
    pub fn report(&self) -> &SelectionReport {
        match self {
            SelectionError::NoAvailableModel(report) => report,
        }
    }
}

/// Live reference to one committed candidate
#[derive(Clone)]
pub struct ModelHandle {
    candidate: Arc<ModelCandidate>,
    backend: Arc<dyn LlmService>,
    backoff: Backoff,
    report: Arc<SelectionReport>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.candidate.name)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn new(candidate: ModelCandidate, backend: Arc<dyn LlmService>) -> Self {
        Self {
            candidate: Arc::new(candidate),
            backend,
            backoff: Backoff::default(),
            report: Arc::new(SelectionReport::default()),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn candidate(&self) -> &ModelCandidate {
        &self.candidate
    }

    pub fn model_name(&self) -> &str {
        &self.candidate.name
    }

    pub fn selection_report(&self) -> &SelectionReport {
        &self.report
    }

    /// Same committed selection (not merely the same model name)
    pub fn same_as(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.candidate, &other.candidate)
    }

    /// Call with this candidate's parameters.
    ///
    /// Retryable failures are retried up to `max_retries` times, all within
    /// one `timeout` budget.
    pub async fn complete(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let request = LlmRequest::for_candidate(&self.candidate, messages.to_vec());
        match tokio::time::timeout(request.timeout, self.complete_with_retries(&request)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(&request)),
        }
    }

    async fn complete_with_retries(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut attempt = 1;
        loop {
            match bounded_complete(self.backend.as_ref(), request).await {
                Err(e) if e.kind.is_retryable() && attempt <= request.max_retries => {
                    tracing::warn!(
                        model = %request.model,
                        attempt,
                        kind = ?e.kind,
                        error = %e.message,
                        "Model call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn timed_out(request: &LlmRequest) -> LlmError {
    LlmError::timeout(format!(
        "{} did not answer within {}s",
        request.model,
        request.timeout.as_secs_f32()
    ))
}

async fn bounded_complete(
    backend: &dyn LlmService,
    request: &LlmRequest,
) -> Result<LlmResponse, LlmError> {
    match tokio::time::timeout(request.timeout, backend.complete(request)).await {
        Err(_) => Err(timed_out(request)),
        Ok(Ok(response)) if response.is_empty() => Err(LlmError::malformed(format!(
            "{} returned an empty response",
            request.model
        ))),
        Ok(result) => result,
    }
}

/// Walks candidates in priority order and commits the first that answers
pub struct ModelSelector {
    backend: Arc<dyn LlmService>,
    backoff: Backoff,
}

impl ModelSelector {
    pub fn new(backend: Arc<dyn LlmService>) -> Self {
        Self {
            backend,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn select(&self, candidates: &[ModelCandidate]) -> Result<ModelHandle, SelectionError> {
        let mut report = SelectionReport::default();

        for candidate in by_priority(candidates) {
            let attempts_allowed = candidate.max_retries.saturating_add(1);
            let mut attempt = 1;

            loop {
                let started = Instant::now();
                let request = LlmRequest::probe(candidate);
                let result = bounded_complete(self.backend.as_ref(), &request).await;
                let elapsed = started.elapsed();

                match result {
                    Ok(_) => {
                        report.record(&candidate.name, attempt, AttemptOutcome::Success, elapsed);
                        report.selected = Some(candidate.name.clone());
                        tracing::info!(
                            model = %candidate.name,
                            attempt,
                            total_attempts = report.attempts.len(),
                            "Model selected"
                        );
                        return Ok(ModelHandle {
                            candidate: Arc::new(candidate.clone()),
                            backend: self.backend.clone(),
                            backoff: self.backoff,
                            report: Arc::new(report),
                        });
                    }
                    Err(e) => {
                        let retry = e.kind.is_retryable() && attempt < attempts_allowed;
                        tracing::warn!(
                            model = %candidate.name,
                            attempt,
                            kind = ?e.kind,
                            error = %e.message,
                            retry,
                            "Model probe failed"
                        );
                        report.record(
                            &candidate.name,
                            attempt,
                            AttemptOutcome::Failed {
                                kind: e.kind,
                                message: e.message,
                            },
                            elapsed,
                        );

                        if !retry {
                            break;
                        }
                        tokio::time::sleep(self.backoff.delay(attempt)).await;
                        attempt += 1;
                    }
                }
            }
        }

        tracing::error!(
            candidates = candidates.len(),
            attempts = report.attempts.len(),
            "All model candidates exhausted"
        );
        Err(SelectionError::NoAvailableModel(report))
    }
}

/// Snapshot of the process-wide model slot
#[derive(Debug, Clone, Serialize)]
pub struct ActiveModelStatus {
    pub model: Option<String>,
    pub runtime_failures: u32,
    pub reselect_after_failures: u32,
    /// A selection run is in progress
    pub selecting: bool,
    pub last_selection: Option<SelectionReport>,
}

#[derive(Default)]
struct Slot {
    handle: Option<ModelHandle>,
    runtime_failures: u32,
    last_selection: Option<SelectionReport>,
}

/// Process-wide cached handle.
///
/// Selection runs lazily and at most once at a time; concurrent callers wait
/// for the same result instead of probing in parallel. The slot itself is
/// only locked briefly, so status reads never wait on a selection run.
pub struct ActiveModel {
    selector: ModelSelector,
    candidates: Arc<[ModelCandidate]>,
    reselect_after_failures: u32,
    slot: Mutex<Slot>,
    selecting: tokio::sync::Mutex<()>,
}

impl ActiveModel {
    pub fn new(
        selector: ModelSelector,
        candidates: impl Into<Arc<[ModelCandidate]>>,
        reselect_after_failures: u32,
    ) -> Self {
        Self {
            selector,
            candidates: candidates.into(),
            reselect_after_failures,
            slot: Mutex::new(Slot::default()),
            selecting: tokio::sync::Mutex::new(()),
        }
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<ModelHandle> {
        self.slot().handle.clone()
    }

    /// Current handle, selecting one first if none is committed
    pub async fn handle(&self) -> Result<ModelHandle, SelectionError> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _selecting = self.selecting.lock().await;
        // Whoever held the lock before us may have committed one
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let result = self.selector.select(&self.candidates).await;
        let mut slot = self.slot();
        match result {
            Ok(handle) => {
                slot.last_selection = Some(handle.selection_report().clone());
                slot.runtime_failures = 0;
                slot.handle = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                slot.last_selection = Some(e.report().clone());
                Err(e)
            }
        }
    }

    /// Count a runtime failure against `handle`; drops it past the threshold
    pub fn record_failure(&self, handle: &ModelHandle, kind: LlmErrorKind) {
        let mut slot = self.slot();
        let is_active = slot.handle.as_ref().is_some_and(|h| h.same_as(handle));
        if !is_active {
            return;
        }

        slot.runtime_failures += 1;
        if slot.runtime_failures > self.reselect_after_failures {
            tracing::warn!(
                model = %handle.model_name(),
                failures = slot.runtime_failures,
                last_kind = ?kind,
                "Runtime failure threshold exceeded, model will be reselected"
            );
            slot.handle = None;
            slot.runtime_failures = 0;
        }
    }

    /// Forget the committed handle; the next caller reselects
    pub fn reset(&self) {
        let mut slot = self.slot();
        if let Some(handle) = slot.handle.take() {
            tracing::info!(model = %handle.model_name(), "Active model reset");
        }
        slot.runtime_failures = 0;
    }

    pub fn status(&self) -> ActiveModelStatus {
        let slot = self.slot();
        ActiveModelStatus {
            model: slot.handle.as_ref().map(|h| h.model_name().to_string()),
            runtime_failures: slot.runtime_failures,
            reselect_after_failures: self.reselect_after_failures,
            selecting: self.selecting.try_lock().is_err(),
            last_selection: slot.last_selection.clone(),
        }
    }
}
