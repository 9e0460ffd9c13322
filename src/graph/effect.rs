//! Effects produced by graph transitions

use super::NodeOutput;

/// Work the executor performs after a transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEffect {
    /// Run a node against the current conversation state
    RunNode { node: String },

    /// Fold a node's output into the conversation state
    ApplyOutput { node: String, output: NodeOutput },

    /// The turn reached END
    Finish,
}
