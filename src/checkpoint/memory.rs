//! In-memory checkpoint store for tests and ephemeral deployments

use super::{Checkpoint, CheckpointError, CheckpointResult, CheckpointStore, Revision};
use crate::conversation::ConversationState;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Entry {
    state: Option<ConversationState>,
    revision: Revision,
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        expected: Revision,
    ) -> CheckpointResult<Revision> {
        let mut entries = self.entries.write().await;
        let actual = entries
            .get(thread_id)
            .map_or(Revision::default(), |e| e.revision);
        if actual != expected {
            return Err(CheckpointError::VersionConflict {
                thread_id: thread_id.to_string(),
                expected,
                actual,
            });
        }

        let revision = actual.next();
        entries.insert(
            thread_id.to_string(),
            Entry {
                state: Some(state.clone()),
                revision,
            },
        );
        Ok(revision)
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Checkpoint> {
        let entries = self.entries.read().await;
        Ok(match entries.get(thread_id) {
            Some(Entry {
                state: Some(state),
                revision,
            }) => Checkpoint {
                thread_id: thread_id.to_string(),
                state: state.clone(),
                revision: *revision,
            },
            Some(Entry {
                state: None,
                revision,
            }) => Checkpoint::empty(thread_id, *revision),
            None => Checkpoint::empty(thread_id, Revision::default()),
        })
    }

    async fn clear(&self, thread_id: &str) -> CheckpointResult<Revision> {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(thread_id.to_string()).or_insert(Entry {
            state: None,
            revision: Revision::default(),
        });
        entry.state = None;
        entry.revision = entry.revision.cleared();
        Ok(entry.revision)
    }
}
