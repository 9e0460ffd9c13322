//! Bounded message history with a positional windowing policy

use super::{Message, Role};
use serde::{Deserialize, Serialize};

/// Ordered history for one thread.
///
/// Insertion order is preserved. A leading system message survives every
/// windowing pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Trim history to at most `max_messages`, returning how many were dropped.
    ///
    /// Keeps index 0 when it is a system message, plus the most recent
    /// messages that fit. Only position and role are consulted.
    pub fn enforce_window(&mut self, max_messages: usize) -> usize {
        let len = self.messages.len();
        if len <= max_messages {
            return 0;
        }

        let keep_system = max_messages > 0 && self.messages.first().is_some_and(Message::is_system);
        let (start, tail) = if keep_system {
            (1, max_messages - 1)
        } else {
            (0, max_messages)
        };

        self.messages.drain(start..len - tail).count()
    }

    /// Drop everything, optionally re-inserting a single system message
    pub fn clear(&mut self, seed_system_message: Option<&str>) {
        self.messages.clear();
        if let Some(prompt) = seed_system_message {
            self.messages.push(Message::system(prompt));
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The final message, if it was written by the assistant
    pub fn trailing_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.role() == Role::Assistant)
    }
}
