//! Graph construction and validation

use super::{DialogueGraph, GraphNode, Successor, Topology};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Virtual entry point
pub const START: &str = "__start__";
/// Virtual exit point
pub const END: &str = "__end__";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    #[error("graph has no nodes")]
    Empty,
    #[error("node name {0} is reserved")]
    ReservedName(String),
    #[error("node {0} added twice")]
    DuplicateNode(String),
    #[error("edge references unknown node {0}")]
    UnknownNode(String),
    #[error("edge {from} -> {to} is not allowed")]
    InvalidEdge { from: String, to: String },
    #[error("no edge from START")]
    MissingEntry,
    #[error("{0} has more than one outgoing edge")]
    MultipleEdges(String),
    #[error("{0} has no outgoing edge")]
    DanglingNode(String),
    #[error("cycle with no path to END: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("{0} is unreachable from START")]
    Unreachable(String),
}

/// Collects nodes and edges, then validates them into a [`DialogueGraph`]
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(String, Arc<dyn GraphNode>)>,
    edges: Vec<(String, String)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl GraphNode + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    pub fn build(self) -> Result<DialogueGraph, GraphBuildError> {
        if self.nodes.is_empty() {
            return Err(GraphBuildError::Empty);
        }

        let mut nodes: HashMap<String, Arc<dyn GraphNode>> = HashMap::new();
        for (name, node) in self.nodes {
            if name == START || name == END {
                return Err(GraphBuildError::ReservedName(name));
            }
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphBuildError::DuplicateNode(name));
            }
        }

        let mut entry: Option<String> = None;
        let mut successors: HashMap<String, Successor> = HashMap::new();
        for (from, to) in self.edges {
            if from == END || to == START {
                return Err(GraphBuildError::InvalidEdge { from, to });
            }
            if from != START && !nodes.contains_key(&from) {
                return Err(GraphBuildError::UnknownNode(from));
            }
            if to != END && !nodes.contains_key(&to) {
                return Err(GraphBuildError::UnknownNode(to));
            }

            if from == START {
                if to == END {
                    return Err(GraphBuildError::InvalidEdge { from, to });
                }
                if entry.replace(to).is_some() {
                    return Err(GraphBuildError::MultipleEdges(START.to_string()));
                }
                continue;
            }

            let target = if to == END {
                Successor::End
            } else {
                Successor::Node(to)
            };
            if successors.insert(from.clone(), target).is_some() {
                return Err(GraphBuildError::MultipleEdges(from));
            }
        }

        let entry = entry.ok_or(GraphBuildError::MissingEntry)?;

        let mut names: Vec<&String> = nodes.keys().collect();
        names.sort();
        if let Some(dangling) = names.iter().find(|n| !successors.contains_key(n.as_str())) {
            return Err(GraphBuildError::DanglingNode((*dangling).clone()));
        }

        // Every node has exactly one successor, so the walk from the entry is a
        // single path that either reaches END or loops.
        let mut path = vec![entry.clone()];
        let mut seen: HashSet<&str> = HashSet::from([entry.as_str()]);
        let mut current = entry.as_str();
        while let Some(Successor::Node(next)) = successors.get(current) {
            path.push(next.clone());
            if !seen.insert(next.as_str()) {
                return Err(GraphBuildError::Cycle(path));
            }
            current = next.as_str();
        }

        if let Some(unreachable) = names.iter().find(|n| !seen.contains(n.as_str())) {
            return Err(GraphBuildError::Unreachable((*unreachable).clone()));
        }

        Ok(DialogueGraph::from_parts(
            Topology::new(entry, successors),
            nodes,
        ))
    }
}
