//! Parley - multi-turn conversation orchestration over generative backends
//!
//! Each user turn flows through a bounded history window, a small dialogue
//! graph and a versioned checkpoint store, against a model picked once from
//! an ordered candidate list.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod graph;
pub mod llm;
pub mod service;

#[cfg(test)]
mod testing;
