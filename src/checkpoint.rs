//! Versioned per-thread state snapshots
//!
//! Every thread has one checkpoint, overwritten on each save. Writes carry
//! the revision they were based on and are rejected when it is stale.

mod memory;
mod sqlite;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use crate::conversation::ConversationState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Position of a checkpoint in a thread's write history.
///
/// `version` counts saves since the last clear. `generation` counts clears,
/// so a write based on a pre-reset `{0, 0}` cannot land after a reset.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Revision {
    pub generation: u64,
    pub version: u64,
}

impl Revision {
    pub fn new(generation: u64, version: u64) -> Self {
        Self {
            generation,
            version,
        }
    }

    /// Revision produced by a successful save on top of this one
    pub fn next(self) -> Self {
        Self::new(self.generation, self.version + 1)
    }

    /// Revision produced by clearing the thread
    pub fn cleared(self) -> Self {
        Self::new(self.generation + 1, 0)
    }

    /// No save has happened since creation or the last clear
    pub fn is_unsaved(self) -> bool {
        self.version == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.version)
    }
}

/// Snapshot of one thread plus the revision it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub thread_id: String,
    pub state: ConversationState,
    pub revision: Revision,
}

impl Checkpoint {
    /// Default-empty checkpoint returned for unsaved threads
    pub fn empty(thread_id: &str, revision: Revision) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            state: ConversationState::new(thread_id),
            revision,
        }
    }

    pub fn exists(&self) -> bool {
        !self.revision.is_unsaved()
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Version conflict on thread {thread_id}: expected {expected}, actual {actual}")]
    VersionConflict {
        thread_id: String,
        expected: Revision,
        actual: Revision,
    },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckpointError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CheckpointError::VersionConflict { .. })
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Persistence for per-thread conversation state
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Overwrite the thread's checkpoint if `expected` is still current
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        expected: Revision,
    ) -> CheckpointResult<Revision>;

    /// Current checkpoint, or a default-empty one at version 0
    async fn load(&self, thread_id: &str) -> CheckpointResult<Checkpoint>;

    /// Drop the thread's history and start a new generation at version 0
    async fn clear(&self, thread_id: &str) -> CheckpointResult<Revision>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn save(
        &self,
        thread_id: &str,
        state: &ConversationState,
        expected: Revision,
    ) -> CheckpointResult<Revision> {
        (**self).save(thread_id, state, expected).await
    }

    async fn load(&self, thread_id: &str) -> CheckpointResult<Checkpoint> {
        (**self).load(thread_id).await
    }

    async fn clear(&self, thread_id: &str) -> CheckpointResult<Revision> {
        (**self).clear(thread_id).await
    }
}
