//! Events that drive graph transitions

use super::NodeOutput;

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// Start the turn at the entry node
    Begin,
    /// A node produced its output
    NodeFinished { node: String, output: NodeOutput },
}
