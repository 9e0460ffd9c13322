//! Graph execution states and topology

use std::collections::HashMap;

/// Where a single turn currently is in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphState {
    /// Turn not started
    Start,
    /// A node is running
    Processing { node: String },
    /// Turn complete
    End,
}

impl GraphState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphState::End)
    }
}

/// Where the next transition goes after a node finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successor {
    Node(String),
    End,
}

/// Validated shape of a graph: one entry node and exactly one successor per node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    entry: String,
    successors: HashMap<String, Successor>,
}

impl Topology {
    /// Only the builder produces topologies from user input
    pub(super) fn new(entry: String, successors: HashMap<String, Successor>) -> Self {
        Self { entry, successors }
    }

    /// `a -> b -> ... -> END`
    pub fn linear<I, S>(nodes: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = nodes.into_iter().map(Into::into).collect();
        let entry = names.first()?.clone();
        let mut successors = HashMap::new();
        for (i, name) in names.iter().enumerate() {
            let next = names
                .get(i + 1)
                .map_or(Successor::End, |n| Successor::Node(n.clone()));
            if successors.insert(name.clone(), next).is_some() {
                return None;
            }
        }
        Some(Self { entry, successors })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn successor(&self, node: &str) -> Option<&Successor> {
        self.successors.get(node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.successors.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }
}
