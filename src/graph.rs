//! Dialogue graph
//!
//! Drives one turn from START through processing nodes to END. Transitions
//! are pure (Elm style); [`DialogueGraph::invoke`] interprets the effects.

mod builder;
mod effect;
mod event;
mod node;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use builder::{GraphBuildError, GraphBuilder, END, START};
pub use effect::GraphEffect;
pub use event::GraphEvent;
pub use node::{ChatNode, GraphNode, NodeOutcome, NodeOutput, FALLBACK_REPLY};
pub use state::{GraphState, Successor, Topology};
pub use transition::{transition, TransitionError, TransitionResult};

use crate::conversation::{ConversationState, Message};
use crate::llm::{LlmErrorKind, ModelHandle};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Slack on top of the candidate timeout before a node is abandoned
const NODE_GUARD_GRACE: Duration = Duration::from_secs(1);

/// Node name used by the default graph
pub const CHAT_NODE: &str = "chat";

/// Outcome of one node during a turn
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub node: String,
    pub outcome: NodeOutcome,
}

/// Final state of a turn plus what each node did
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub state: ConversationState,
    pub nodes: Vec<NodeReport>,
}

impl TurnResult {
    /// First fallback kind, if any node fell back
    pub fn fallback_kind(&self) -> Option<LlmErrorKind> {
        self.nodes.iter().find_map(|r| match r.outcome {
            NodeOutcome::Fallback(kind) => Some(kind),
            NodeOutcome::Replied => None,
        })
    }
}

/// Validated graph of processing nodes
pub struct DialogueGraph {
    topology: Topology,
    nodes: HashMap<String, Arc<dyn GraphNode>>,
}

impl std::fmt::Debug for DialogueGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueGraph")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl DialogueGraph {
    pub(crate) fn from_parts(topology: Topology, nodes: HashMap<String, Arc<dyn GraphNode>>) -> Self {
        Self { topology, nodes }
    }

    /// START -> chat -> END
    pub fn chat() -> Self {
        let mut successors = HashMap::new();
        successors.insert(CHAT_NODE.to_string(), Successor::End);
        let mut nodes: HashMap<String, Arc<dyn GraphNode>> = HashMap::new();
        nodes.insert(CHAT_NODE.to_string(), Arc::new(ChatNode));
        Self::from_parts(Topology::new(CHAT_NODE.to_string(), successors), nodes)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run one turn to END.
    ///
    /// Every node appends exactly one assistant message. Node failures are
    /// already folded into fallback output, so errors here mean a broken
    /// graph, not a broken backend.
    pub async fn invoke(
        &self,
        mut state: ConversationState,
        model: &ModelHandle,
    ) -> Result<TurnResult, TransitionError> {
        let mut graph_state = GraphState::Start;
        let mut events = VecDeque::from([GraphEvent::Begin]);
        let mut reports = Vec::new();

        while let Some(event) = events.pop_front() {
            let result = transition(&graph_state, &self.topology, event)?;
            graph_state = result.new_state;

            for effect in result.effects {
                match effect {
                    GraphEffect::RunNode { node } => {
                        let output = self.run_node(&node, &state, model).await?;
                        events.push_back(GraphEvent::NodeFinished { node, output });
                    }
                    GraphEffect::ApplyOutput { node, output } => {
                        state.memory.append(Message::assistant(output.reply));
                        state.turn_count = output.turn_count;
                        state.last_activity = Some(output.last_activity);
                        reports.push(NodeReport {
                            node,
                            outcome: output.outcome,
                        });
                    }
                    GraphEffect::Finish => {
                        tracing::debug!(
                            thread_id = %state.thread_id,
                            nodes = reports.len(),
                            "Graph reached END"
                        );
                    }
                }
            }
        }

        if !graph_state.is_terminal() {
            return Err(TransitionError::InvalidTransition(format!(
                "graph stopped in {graph_state:?}"
            )));
        }

        Ok(TurnResult {
            state,
            nodes: reports,
        })
    }

    async fn run_node(
        &self,
        name: &str,
        state: &ConversationState,
        model: &ModelHandle,
    ) -> Result<NodeOutput, TransitionError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| TransitionError::UnknownNode(name.to_string()))?;

        let guard = model.candidate().timeout + NODE_GUARD_GRACE;
        match tokio::time::timeout(guard, node.run(state, model)).await {
            Ok(output) => Ok(output),
            Err(_) => {
                tracing::warn!(
                    thread_id = %state.thread_id,
                    node = %name,
                    guard_ms = %guard.as_millis(),
                    "Node exceeded its guard, falling back"
                );
                Ok(NodeOutput::fallback(state, LlmErrorKind::Timeout))
            }
        }
    }
}
