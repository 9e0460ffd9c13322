//! HTTP API
//!
//! Thin presentation layer over [`OrchestrationService`].

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::checkpoint::CheckpointStore;
use crate::service::OrchestrationService;
use std::sync::Arc;

/// Service type behind the HTTP layer
pub type SharedService = Arc<OrchestrationService<Arc<dyn CheckpointStore>>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: SharedService,
}

impl AppState {
    pub fn new(service: SharedService) -> Self {
        Self { service }
    }
}
