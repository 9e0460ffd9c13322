//! Conversation data model
//!
//! Messages, per-thread conversation state, and the bounded history that
//! backs each thread.

mod memory;

pub use memory::ConversationMemory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// State of one conversation thread between turns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    #[serde(rename = "messages")]
    pub memory: ConversationMemory,
    pub turn_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// Empty state, no system message
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            memory: ConversationMemory::new(),
            turn_count: 0,
            last_activity: None,
        }
    }

    /// Fresh state seeded with an optional system message
    pub fn seeded(thread_id: impl Into<String>, system_prompt: Option<&str>) -> Self {
        let mut state = Self::new(thread_id);
        state.memory.clear(system_prompt);
        state
    }

    pub fn stats(&self) -> ThreadStats {
        ThreadStats {
            turn_count: self.turn_count,
            last_activity: self.last_activity,
            message_count: self.memory.len(),
        }
    }
}

/// Read-only summary of a thread
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub turn_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub message_count: usize,
}
