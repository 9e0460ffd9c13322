//! Turn orchestration
//!
//! Composes memory, the active model, the dialogue graph and the checkpoint
//! store. `process_turn` never fails to the caller.

mod reply;

pub use reply::{Fragments, Reply};

use crate::checkpoint::{CheckpointError, CheckpointStore, Revision};
use crate::conversation::{ConversationState, Message, ThreadStats};
use crate::graph::{DialogueGraph, TurnResult};
use crate::llm::{ActiveModel, ModelHandle, SelectionError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Returned when no reply could be produced at all. Carries no error detail.
pub const APOLOGY_REPLY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";

/// Per-service conversation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Seeded as the first message of every new or reset thread
    pub system_prompt: Option<String>,
    /// Maximum messages sent to the model, system message included
    pub window_size: usize,
}

/// One async mutex per thread id, created on demand.
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Default)]
struct ThreadLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    async fn acquire(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(thread_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct OrchestrationService<S> {
    store: S,
    model: Arc<ActiveModel>,
    graph: DialogueGraph,
    config: ServiceConfig,
    locks: ThreadLocks,
}

impl<S: CheckpointStore> OrchestrationService<S> {
    pub fn new(store: S, model: Arc<ActiveModel>, config: ServiceConfig) -> Self {
        Self {
            store,
            model,
            graph: DialogueGraph::chat(),
            config,
            locks: ThreadLocks::default(),
        }
    }

    pub fn with_graph(mut self, graph: DialogueGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn model(&self) -> &ActiveModel {
        &self.model
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Select a model ahead of the first turn
    pub async fn warm_up(&self) -> Result<String, SelectionError> {
        let handle = self.model.handle().await?;
        Ok(handle.model_name().to_string())
    }

    fn fresh_state(&self, thread_id: &str) -> ConversationState {
        ConversationState::seeded(thread_id, self.config.system_prompt.as_deref())
    }

    /// Run one user turn. Turns on the same thread queue behind each other.
    pub async fn process_turn(&self, thread_id: &str, user_text: &str) -> Reply {
        let _turn = self.locks.acquire(thread_id).await;

        let handle = match self.model.handle().await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(thread_id = %thread_id, error = %e, "No model available for turn");
                return Reply::degraded(APOLOGY_REPLY);
            }
        };

        let mut retried = false;
        loop {
            let (turn, base) = match self.run_turn(thread_id, user_text, &handle).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(thread_id = %thread_id, error = %e, "Turn failed");
                    return Reply::degraded(APOLOGY_REPLY);
                }
            };

            let fallback = turn.fallback_kind();
            if let Some(kind) = fallback {
                self.model.record_failure(&handle, kind);
            }
            let reply = match turn.state.memory.trailing_assistant() {
                Some(message) if fallback.is_none() => Reply::new(message.content()),
                Some(message) => Reply::degraded(message.content()),
                None => Reply::degraded(APOLOGY_REPLY),
            };

            match self.store.save(thread_id, &turn.state, base).await {
                Ok(revision) => {
                    tracing::info!(
                        thread_id = %thread_id,
                        model = %handle.model_name(),
                        turn_count = turn.state.turn_count,
                        messages = turn.state.memory.len(),
                        revision = %revision,
                        degraded = reply.degraded,
                        "Turn persisted"
                    );
                    return reply;
                }
                Err(e) if e.is_conflict() && !retried => {
                    tracing::warn!(thread_id = %thread_id, error = %e, "Checkpoint moved underneath turn, retrying once");
                    retried = true;
                }
                Err(e) => {
                    tracing::error!(thread_id = %thread_id, error = %e, "Discarding turn update");
                    return reply;
                }
            }
        }
    }

    /// Load, append the user message, window, and run the graph
    async fn run_turn(
        &self,
        thread_id: &str,
        user_text: &str,
        handle: &ModelHandle,
    ) -> Result<(TurnResult, Revision), TurnError> {
        let checkpoint = self.store.load(thread_id).await?;
        let mut state = if checkpoint.exists() {
            checkpoint.state
        } else {
            self.fresh_state(thread_id)
        };

        state.memory.append(Message::user(user_text));
        let dropped = state.memory.enforce_window(self.config.window_size);
        if dropped > 0 {
            tracing::debug!(thread_id = %thread_id, dropped, "History windowed");
        }

        let turn = self.graph.invoke(state, handle).await?;
        Ok((turn, checkpoint.revision))
    }

    /// Stats from the checkpoint; defaults when the thread has none
    pub async fn get_stats(&self, thread_id: &str) -> Result<ThreadStats, CheckpointError> {
        let checkpoint = self.store.load(thread_id).await?;
        Ok(checkpoint.state.stats())
    }

    /// Stored messages for inspection
    pub async fn get_history(&self, thread_id: &str) -> Result<Vec<Message>, CheckpointError> {
        let checkpoint = self.store.load(thread_id).await?;
        Ok(checkpoint.state.memory.messages().to_vec())
    }

    /// Clear the thread and reseed the system message.
    ///
    /// Does not wait for or cancel an in-flight turn; that turn's write is
    /// rejected by the revision check.
    pub async fn reset_thread(&self, thread_id: &str) -> Result<ThreadStats, CheckpointError> {
        let cleared = self.store.clear(thread_id).await?;
        let state = self.fresh_state(thread_id);
        if state.memory.is_empty() {
            tracing::info!(thread_id = %thread_id, "Thread reset");
            return Ok(state.stats());
        }

        match self.store.save(thread_id, &state, cleared).await {
            Ok(_) => {}
            // Someone wrote after our clear; their state already starts from it
            Err(e) if e.is_conflict() => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Reseed lost to a concurrent write");
                return self.get_stats(thread_id).await;
            }
            Err(e) => return Err(e),
        }

        tracing::info!(thread_id = %thread_id, "Thread reset");
        Ok(state.stats())
    }
}

#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Graph(#[from] crate::graph::TransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, CheckpointResult, InMemoryCheckpointStore};
    use crate::conversation::Role;
    use crate::graph::FALLBACK_REPLY;
    use crate::llm::{Backoff, LlmErrorKind, LlmService, ModelCandidate, ModelSelector};
    use crate::testing::{DelayedBackend, ScriptedBackend};
    use async_trait::async_trait;
    use std::time::Duration;

    fn active_model(backend: Arc<dyn LlmService>, models: &[&str], threshold: u32) -> Arc<ActiveModel> {
        let selector = ModelSelector::new(backend).with_backoff(Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
        });
        let candidates: Vec<ModelCandidate> = (0u32..)
            .zip(models)
            .map(|(priority, name)| ModelCandidate::new(*name, priority))
            .collect();
        Arc::new(ActiveModel::new(selector, candidates, threshold))
    }

    fn config(window_size: usize) -> ServiceConfig {
        ServiceConfig {
            system_prompt: Some("You are helpful.".to_string()),
            window_size,
        }
    }

    fn service(backend: Arc<dyn LlmService>) -> OrchestrationService<Arc<InMemoryCheckpointStore>> {
        OrchestrationService::new(
            Arc::new(InMemoryCheckpointStore::new()),
            active_model(backend, &["m"], 3),
            config(21),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_first_turn() {
        let backend = Arc::new(ScriptedBackend::new().always("m", "4"));
        let service = service(backend.clone());

        let reply = service.process_turn("t", "2+2?").await;
        assert_eq!(reply, Reply::new("4"));

        let history = service.get_history("t").await.unwrap();
        let roles: Vec<Role> = history.iter().map(Message::role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(history[0].content(), "You are helpful.");
        assert_eq!(history[1].content(), "2+2?");

        let stats = service.get_stats("t").await.unwrap();
        assert_eq!(stats.turn_count, 1);
        assert_eq!(stats.message_count, 3);
        assert!(stats.last_activity.is_some());

        // Probe plus one turn; the turn saw system and user messages
        let requests = backend.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_turns_count_up() {
        let service = service(Arc::new(ScriptedBackend::new().always("m", "ok")));

        let mut previous = service.get_stats("t").await.unwrap();
        for expected in 1..=3 {
            service.process_turn("t", "hello").await;
            let stats = service.get_stats("t").await.unwrap();
            assert_eq!(stats.turn_count, expected);
            assert!(stats.message_count >= previous.message_count);
            previous = stats;
        }
    }

    #[tokio::test]
    async fn test_window_bounds_model_input() {
        let backend = Arc::new(ScriptedBackend::new().always("m", "ok"));
        let service = OrchestrationService::new(
            Arc::new(InMemoryCheckpointStore::new()),
            active_model(backend.clone(), &["m"], 3),
            config(5),
        );

        for i in 0..6 {
            service.process_turn("t", &format!("q{i}")).await;
        }

        let last = backend.recorded_requests().pop().unwrap();
        assert_eq!(last.messages.len(), 5);
        assert!(last.messages[0].is_system());
        assert_eq!(last.messages[4].content(), "q5");

        // Stored history is the window plus the new reply
        assert_eq!(service.get_stats("t").await.unwrap().message_count, 6);
    }

    #[tokio::test]
    async fn test_reset_then_stats() {
        let service = service(Arc::new(ScriptedBackend::new().always("m", "ok")));
        service.process_turn("t", "one").await;
        service.process_turn("t", "two").await;

        let after_reset = service.reset_thread("t").await.unwrap();
        let stats = service.get_stats("t").await.unwrap();

        assert_eq!(after_reset, stats);
        assert_eq!(stats.turn_count, 0);
        assert_eq!(stats.message_count, 1);
        assert!(service.get_history("t").await.unwrap()[0].is_system());
    }

    #[tokio::test]
    async fn test_reset_without_system_prompt_empties() {
        let service = OrchestrationService::new(
            Arc::new(InMemoryCheckpointStore::new()),
            active_model(Arc::new(ScriptedBackend::new().always("m", "ok")), &["m"], 3),
            ServiceConfig {
                system_prompt: None,
                window_size: 21,
            },
        );
        service.process_turn("t", "one").await;

        service.reset_thread("t").await.unwrap();
        let stats = service.get_stats("t").await.unwrap();
        assert_eq!(stats.turn_count, 0);
        assert_eq!(stats.message_count, 0);
    }

    #[tokio::test]
    async fn test_stats_for_unknown_thread_are_default() {
        let service = service(Arc::new(ScriptedBackend::new()));
        assert_eq!(service.get_stats("ghost").await.unwrap(), ThreadStats::default());
        assert!(service.get_history("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_model_returns_apology_and_persists_nothing() {
        let backend = Arc::new(ScriptedBackend::new().fail_always("m", LlmErrorKind::PermissionDenied));
        let service = service(backend);

        let reply = service.process_turn("t", "hi").await;

        assert_eq!(reply, Reply::degraded(APOLOGY_REPLY));
        assert_eq!(service.get_stats("t").await.unwrap(), ThreadStats::default());
    }

    #[tokio::test]
    async fn test_selection_is_retried_on_next_turn() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_fail("m", LlmErrorKind::NotFound)
                .always("m", "back"),
        );
        let service = service(backend);

        assert!(service.process_turn("t", "hi").await.degraded);
        assert_eq!(service.process_turn("t", "hi").await, Reply::new("back"));
    }

    #[tokio::test]
    async fn test_backend_failure_returns_fallback_and_keeps_count() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_reply("m", "probe ok")
                .fail_always("m", LlmErrorKind::Unavailable),
        );
        let service = service(backend);

        let reply = service.process_turn("t", "hi").await;

        assert_eq!(reply, Reply::degraded(FALLBACK_REPLY));
        let stats = service.get_stats("t").await.unwrap();
        assert_eq!(stats.turn_count, 0);
        assert_eq!(stats.message_count, 3);
    }

    #[tokio::test]
    async fn test_transient_backend_failure_is_retried_within_turn() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_reply("m", "probe ok")
                .then_fail("m", LlmErrorKind::Unavailable)
                .always("m", "real answer"),
        );
        let service = service(backend.clone());

        let reply = service.process_turn("t", "2+2?").await;

        assert_eq!(reply, Reply::new("real answer"));
        assert_eq!(backend.calls_for("m"), 3);
        assert_eq!(service.get_stats("t").await.unwrap().turn_count, 1);
        assert_eq!(service.model().status().runtime_failures, 0);
    }

    #[tokio::test]
    async fn test_runtime_failures_trigger_reselection() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_reply("primary", "probe ok")
                .fail_always("primary", LlmErrorKind::Unavailable)
                .always("backup", "fine"),
        );
        let service = OrchestrationService::new(
            Arc::new(InMemoryCheckpointStore::new()),
            active_model(backend, &["primary", "backup"], 0),
            config(21),
        );

        service.process_turn("t", "one").await;
        assert!(service.model().status().model.is_none());

        // Reselection skips the now-failing primary
        assert_eq!(service.process_turn("t", "two").await, Reply::new("fine"));
        assert_eq!(service.model().status().model.as_deref(), Some("backup"));
    }

    /// Store that lets another writer slip in before each of the first `n` saves
    struct InterferingStore {
        inner: InMemoryCheckpointStore,
        remaining: Mutex<u32>,
    }

    impl InterferingStore {
        fn new(n: u32) -> Self {
            Self {
                inner: InMemoryCheckpointStore::new(),
                remaining: Mutex::new(n),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for InterferingStore {
        async fn save(
            &self,
            thread_id: &str,
            state: &ConversationState,
            expected: Revision,
        ) -> CheckpointResult<Revision> {
            let interfere = {
                let mut remaining = self.remaining.lock().unwrap();
                let go = *remaining > 0;
                *remaining = remaining.saturating_sub(1);
                go
            };
            if interfere {
                let current = self.inner.load(thread_id).await?;
                let mut other = if current.exists() {
                    current.state
                } else {
                    ConversationState::seeded(thread_id, Some("You are helpful."))
                };
                other.memory.append(Message::user("other writer"));
                other.memory.append(Message::assistant("other reply"));
                other.turn_count += 1;
                self.inner.save(thread_id, &other, current.revision).await?;
            }
            self.inner.save(thread_id, state, expected).await
        }

        async fn load(&self, thread_id: &str) -> CheckpointResult<Checkpoint> {
            self.inner.load(thread_id).await
        }

        async fn clear(&self, thread_id: &str) -> CheckpointResult<Revision> {
            self.inner.clear(thread_id).await
        }
    }

    #[tokio::test]
    async fn test_conflict_reloads_and_retries_once() {
        let service = OrchestrationService::new(
            InterferingStore::new(1),
            active_model(Arc::new(ScriptedBackend::new().always("m", "mine")), &["m"], 3),
            config(21),
        );

        let reply = service.process_turn("t", "hello").await;
        assert_eq!(reply, Reply::new("mine"));

        let history = service.get_history("t").await.unwrap();
        let contents: Vec<&str> = history.iter().map(Message::content).collect();
        assert_eq!(
            contents,
            vec!["You are helpful.", "other writer", "other reply", "hello", "mine"]
        );
        assert_eq!(service.get_stats("t").await.unwrap().turn_count, 2);
    }

    #[tokio::test]
    async fn test_repeated_conflict_discards_update() {
        let service = OrchestrationService::new(
            InterferingStore::new(2),
            active_model(Arc::new(ScriptedBackend::new().always("m", "mine")), &["m"], 3),
            config(21),
        );

        let reply = service.process_turn("t", "hello").await;
        assert_eq!(reply, Reply::new("mine"));

        let history = service.get_history("t").await.unwrap();
        assert!(history.iter().all(|m| m.content() != "hello"));
        assert_eq!(service.get_stats("t").await.unwrap().turn_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_thread_both_land() {
        let service = Arc::new(service(Arc::new(ScriptedBackend::new().always("m", "ok"))));

        let a = tokio::spawn({
            let service = service.clone();
            async move { service.process_turn("t", "a").await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.process_turn("t", "b").await }
        });
        a.await.unwrap();
        b.await.unwrap();

        let stats = service.get_stats("t").await.unwrap();
        assert_eq!(stats.turn_count, 2);
        assert_eq!(stats.message_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threads_run_in_parallel() {
        let backend = Arc::new(DelayedBackend::new(Duration::from_secs(5), "slow"));
        let service = Arc::new(service(backend));
        service.warm_up().await.unwrap();

        let started = tokio::time::Instant::now();
        let turns: Vec<_> = ["x", "y", "z"]
            .into_iter()
            .map(|thread| {
                let service = service.clone();
                tokio::spawn(async move { service.process_turn(thread, "hi").await })
            })
            .collect();
        for turn in turns {
            assert_eq!(turn.await.unwrap(), Reply::new("slow"));
        }

        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_still_returns_within_timeout() {
        let backend = Arc::new(DelayedBackend::new(Duration::from_secs(60), "late").instant_probe());
        let service = service(backend);
        service.warm_up().await.unwrap();

        let started = tokio::time::Instant::now();
        let reply = service.process_turn("t", "hello?").await;
        let elapsed = started.elapsed();

        assert_eq!(reply, Reply::degraded(FALLBACK_REPLY));
        assert!(elapsed >= Duration::from_secs(30), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(32), "took {elapsed:?}");
        assert_eq!(service.get_stats("t").await.unwrap().message_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_turn_fences_stale_write() {
        let backend = Arc::new(DelayedBackend::new(Duration::from_secs(5), "slow"));
        let service = Arc::new(service(backend));
        service.warm_up().await.unwrap();
        service.process_turn("t", "before").await;
        assert_eq!(service.get_stats("t").await.unwrap().turn_count, 1);

        let turn = tokio::spawn({
            let service = service.clone();
            async move { service.process_turn("t", "during").await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        service.reset_thread("t").await.unwrap();
        turn.await.unwrap();

        // The in-flight write was rejected and replayed on the reset thread
        let history = service.get_history("t").await.unwrap();
        let contents: Vec<&str> = history.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["You are helpful.", "during", "slow"]);
        assert_eq!(service.get_stats("t").await.unwrap().turn_count, 1);
    }

    #[tokio::test]
    async fn test_thread_locks_are_pruned() {
        let locks = ThreadLocks::default();
        {
            let _a = locks.acquire("a").await;
        }
        let _b = locks.acquire("b").await;
        let map = locks.locks.lock().unwrap();
        assert!(!map.contains_key("a"));
        assert!(map.contains_key("b"));
    }
}
