//! API request and response types

use crate::conversation::{Message, ThreadStats};
use serde::{Deserialize, Serialize};

/// Request to run one turn
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub text: String,
}

/// Fragment size for streamed replies
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub chunk: Option<usize>,
}

/// Response for a completed turn
#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub response: String,
    pub degraded: bool,
    pub stats: ThreadStats,
}

/// Response for a newly allocated thread
#[derive(Debug, Serialize)]
pub struct CreateThreadResponse {
    pub thread_id: String,
    pub stats: ThreadStats,
}

/// Stored history of a thread
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
