//! Property-based tests for graph transitions
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use chrono::Utc;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_topology() -> impl Strategy<Value = Topology> {
    prop::collection::hash_set("[a-z]{1,6}", 1..6).prop_map(|names| {
        Topology::linear(names).unwrap_or_else(|| Topology::linear(["chat"]).unwrap())
    })
}

fn arb_output() -> impl Strategy<Value = NodeOutput> {
    ("[a-zA-Z ]{0,20}", 0u64..100, any::<bool>()).prop_map(|(reply, turn_count, ok)| NodeOutput {
        reply,
        turn_count,
        last_activity: Utc::now(),
        outcome: if ok {
            NodeOutcome::Replied
        } else {
            NodeOutcome::Fallback(crate::llm::LlmErrorKind::Timeout)
        },
    })
}

fn arb_event() -> impl Strategy<Value = GraphEvent> {
    prop_oneof![
        Just(GraphEvent::Begin),
        ("[a-z]{1,6}", arb_output()).prop_map(|(node, output)| GraphEvent::NodeFinished { node, output }),
    ]
}

fn arb_state() -> impl Strategy<Value = GraphState> {
    prop_oneof![
        Just(GraphState::Start),
        Just(GraphState::End),
        "[a-z]{1,6}".prop_map(|node| GraphState::Processing { node }),
    ]
}

/// Walk a topology from START, finishing whatever node is running
fn run_to_end(topology: &Topology) -> (GraphState, Vec<GraphEffect>) {
    let mut state = GraphState::Start;
    let mut effects = Vec::new();
    let mut pending = vec![GraphEvent::Begin];

    while let Some(event) = pending.pop() {
        let result = transition(&state, topology, event).unwrap();
        for effect in &result.effects {
            if let GraphEffect::RunNode { node } = effect {
                pending.push(GraphEvent::NodeFinished {
                    node: node.clone(),
                    output: NodeOutput {
                        reply: format!("from {node}"),
                        turn_count: 1,
                        last_activity: Utc::now(),
                        outcome: NodeOutcome::Replied,
                    },
                });
            }
        }
        effects.extend(result.effects);
        state = result.new_state;
    }
    (state, effects)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// transition never panics, and END never accepts anything
    #[test]
    fn prop_transition_is_total(state in arb_state(), topology in arb_topology(), event in arb_event()) {
        let result = transition(&state, &topology, event);
        if state == GraphState::End {
            prop_assert_eq!(result.unwrap_err(), TransitionError::AlreadyFinished);
        }
    }

    /// Happy path reaches END with exactly one applied output per node
    #[test]
    fn prop_every_node_applies_once(topology in arb_topology()) {
        let (state, effects) = run_to_end(&topology);

        prop_assert_eq!(state, GraphState::End);
        let applied = effects.iter().filter(|e| matches!(e, GraphEffect::ApplyOutput { .. })).count();
        prop_assert_eq!(applied, topology.len());
        prop_assert_eq!(effects.last(), Some(&GraphEffect::Finish));
        let finishes = effects.iter().filter(|e| **e == GraphEffect::Finish).count();
        prop_assert_eq!(finishes, 1);
    }

    /// Output is always applied before the next node runs
    #[test]
    fn prop_apply_precedes_next_run(topology in arb_topology()) {
        let (_, effects) = run_to_end(&topology);
        let mut running: Option<String> = None;
        for effect in effects {
            match effect {
                GraphEffect::RunNode { node } => {
                    prop_assert!(running.is_none());
                    running = Some(node);
                }
                GraphEffect::ApplyOutput { node, .. } => {
                    prop_assert_eq!(running.take(), Some(node));
                }
                GraphEffect::Finish => prop_assert!(running.is_none()),
            }
        }
    }
}
