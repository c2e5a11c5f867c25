use std::collections::VecDeque;

use crate::error::AnalysisError;
use crate::ir::{ControlFlowGraph, EdgeKind, NodeId};

/// Out-states produced by executing one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Transfer<S> {
    /// Same state on every normal successor.
    Normal(S),
    /// Branch-specific states for the true and false edges.
    Branch { on_true: S, on_false: S },
}

/// Domain callbacks required by the generic forward solver.
///
/// Exception edges always carry the node's in-state: a throwing statement has not completed
/// its effect when control leaves it.
pub(crate) trait FlowSemantics {
    type State: Clone + Eq;

    fn initial_state(&self, graph: &ControlFlowGraph) -> Self::State;

    fn transfer(
        &self,
        graph: &ControlFlowGraph,
        node: NodeId,
        state: &Self::State,
    ) -> Transfer<Self::State>;

    fn join(&self, left: &Self::State, right: &Self::State) -> Self::State;
}

/// Fixed point of one solve. `None` marks a node no path reaches.
#[derive(Clone, Debug)]
pub(crate) struct Solution<S> {
    pub(crate) in_states: Vec<Option<S>>,
    pub(crate) visits: usize,
}

impl<S> Solution<S> {
    pub(crate) fn in_state(&self, node: NodeId) -> Option<&S> {
        self.in_states.get(node.0).and_then(Option::as_ref)
    }
}

/// Upper bound on node visits before the solver reports non-convergence.
pub(crate) fn default_visit_limit(graph: &ControlFlowGraph) -> usize {
    let nodes = graph.node_count() + 1;
    nodes
        .saturating_mul(nodes + graph.locals.len() + 1)
        .saturating_mul(4)
}

/// Deterministic FIFO worklist solver over a statement-level CFG.
pub(crate) fn solve<A>(
    graph: &ControlFlowGraph,
    analysis: &A,
    visit_limit: usize,
) -> Result<Solution<A::State>, AnalysisError>
where
    A: FlowSemantics,
{
    let mut in_states: Vec<Option<A::State>> = vec![None; graph.node_count()];
    let mut queued = vec![false; graph.node_count()];
    let mut queue = VecDeque::new();
    let mut visits = 0;

    let Some(entry_slot) = in_states.get_mut(graph.entry.0) else {
        return Err(AnalysisError::MalformedGraph {
            method: graph.method.clone(),
            detail: "entry node is missing".to_string(),
        });
    };
    *entry_slot = Some(analysis.initial_state(graph));
    queue.push_back(graph.entry);
    queued[graph.entry.0] = true;

    while let Some(node) = queue.pop_front() {
        queued[node.0] = false;
        visits += 1;
        if visits > visit_limit {
            return Err(AnalysisError::NonConvergence {
                method: graph.method.clone(),
                iterations: visits,
            });
        }
        let Some(state) = in_states[node.0].clone() else {
            continue;
        };
        let out = analysis.transfer(graph, node, &state);

        for edge in graph.successors(node) {
            let edge_state = match (edge.kind, &out) {
                (EdgeKind::Exception, _) => state.clone(),
                (EdgeKind::BranchTrue, Transfer::Branch { on_true, .. }) => on_true.clone(),
                (EdgeKind::BranchFalse, Transfer::Branch { on_false, .. }) => on_false.clone(),
                (_, Transfer::Normal(normal)) => normal.clone(),
                (_, Transfer::Branch { on_true, on_false }) => analysis.join(on_true, on_false),
            };
            let merged = match &in_states[edge.to.0] {
                Some(previous) => analysis.join(previous, &edge_state),
                None => edge_state,
            };
            if in_states[edge.to.0].as_ref() != Some(&merged) {
                in_states[edge.to.0] = Some(merged);
                if !queued[edge.to.0] {
                    queued[edge.to.0] = true;
                    queue.push_back(edge.to);
                }
            }
        }
    }

    Ok(Solution { in_states, visits })
}
