//! Processing nodes

use crate::conversation::ConversationState;
use crate::llm::{LlmErrorKind, ModelHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Reply used when the backend call fails. Carries no error detail.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I ran into a problem while generating a response. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Replied,
    Fallback(LlmErrorKind),
}

/// What a node contributes to the conversation: exactly one assistant reply
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub reply: String,
    pub turn_count: u64,
    pub last_activity: DateTime<Utc>,
    pub outcome: NodeOutcome,
}

impl NodeOutput {
    /// Fallback reply; the turn counter is left as it was
    pub fn fallback(state: &ConversationState, kind: LlmErrorKind) -> Self {
        Self {
            reply: FALLBACK_REPLY.to_string(),
            turn_count: state.turn_count,
            last_activity: Utc::now(),
            outcome: NodeOutcome::Fallback(kind),
        }
    }
}

/// A named step in the dialogue graph. Must not fail: errors become fallback output.
#[async_trait]
pub trait GraphNode: Send + Sync {
    async fn run(&self, state: &ConversationState, model: &ModelHandle) -> NodeOutput;
}

/// Sends the windowed history to the active model
pub struct ChatNode;

#[async_trait]
impl GraphNode for ChatNode {
    async fn run(&self, state: &ConversationState, model: &ModelHandle) -> NodeOutput {
        match model.complete(state.memory.messages()).await {
            Ok(response) => NodeOutput {
                reply: response.text,
                turn_count: state.turn_count + 1,
                last_activity: Utc::now(),
                outcome: NodeOutcome::Replied,
            },
            Err(e) => {
                tracing::warn!(
                    thread_id = %state.thread_id,
                    model = %model.model_name(),
                    kind = ?e.kind,
                    error = %e.message,
                    "Chat node fell back"
                );
                NodeOutput::fallback(state, e.kind)
            }
        }
    }
}
