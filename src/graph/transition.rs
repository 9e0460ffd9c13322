//! Pure graph transition function

use super::{GraphEffect, GraphEvent, GraphState, Successor, Topology};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: GraphState,
    pub effects: Vec<GraphEffect>,
}

impl TransitionResult {
    pub fn new(state: GraphState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: GraphEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Turn already finished")]
    AlreadyFinished,
    #[error("Node {0} is not part of the graph")]
    UnknownNode(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &GraphState,
    topology: &Topology,
    event: GraphEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        (GraphState::End, _) => Err(TransitionError::AlreadyFinished),

        (GraphState::Start, GraphEvent::Begin) => {
            let entry = topology.entry().to_string();
            if !topology.contains(&entry) {
                return Err(TransitionError::UnknownNode(entry));
            }
            Ok(TransitionResult::new(GraphState::Processing {
                node: entry.clone(),
            })
            .with_effect(GraphEffect::RunNode { node: entry }))
        }

        (GraphState::Processing { node: current }, GraphEvent::NodeFinished { node, output }) => {
            if *current != node {
                return Err(TransitionError::InvalidTransition(format!(
                    "{node} finished while {current} was running"
                )));
            }

            let applied = GraphEffect::ApplyOutput {
                node: node.clone(),
                output,
            };
            match topology.successor(&node) {
                Some(Successor::End) => Ok(TransitionResult::new(GraphState::End)
                    .with_effect(applied)
                    .with_effect(GraphEffect::Finish)),
                Some(Successor::Node(next)) => Ok(TransitionResult::new(GraphState::Processing {
                    node: next.clone(),
                })
                .with_effect(applied)
                .with_effect(GraphEffect::RunNode { node: next.clone() })),
                None => Err(TransitionError::UnknownNode(node)),
            }
        }

        (GraphState::Start, GraphEvent::NodeFinished { node, .. }) => Err(
            TransitionError::InvalidTransition(format!("{node} finished before the turn began")),
        ),

        (GraphState::Processing { node }, GraphEvent::Begin) => Err(
            TransitionError::InvalidTransition(format!("turn already running at {node}")),
        ),
    }
}
