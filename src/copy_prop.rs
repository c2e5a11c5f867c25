//! Copy propagation over the statement-level CFG.
//!
//! ```text
//! x = y
//! z = x    =>   z = y
//! ```
//!
//! A use of `x` is rewritten only when its single reaching definition is the copy `x = y` and
//! `y` cannot have changed in between: either `y` has one definition in the whole body, or the
//! use sits on the straight-line path that leaves the copy and that path never redefines `y`.
//! Locals tested by a null check or `instanceof` are never substituted, in either direction:
//! the branch refines the tested local only, so a rewrite would move the refinement onto a
//! different local than the one later uses read.

use std::collections::BTreeSet;

use tracing::debug;

use crate::dataflow::worklist::{FlowSemantics, Transfer, default_visit_limit, solve};
use crate::error::AnalysisError;
use crate::ir::{ControlFlowGraph, Expr, LocalId, NodeId, Operand, Place, Stmt};

/// Definition site of a local.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum DefSite {
    /// Parameter value on method entry.
    Entry,
    /// No assignment yet on some path.
    Undefined,
    Node(NodeId),
}

/// Reaching definitions, per local.
pub(crate) struct ReachingDefinitions;

impl FlowSemantics for ReachingDefinitions {
    type State = Vec<BTreeSet<DefSite>>;

    fn initial_state(&self, graph: &ControlFlowGraph) -> Self::State {
        graph
            .locals
            .iter()
            .map(|local| {
                if local.is_parameter {
                    BTreeSet::from([DefSite::Entry])
                } else {
                    BTreeSet::from([DefSite::Undefined])
                }
            })
            .collect()
    }

    fn transfer(
        &self,
        graph: &ControlFlowGraph,
        node: NodeId,
        state: &Self::State,
    ) -> Transfer<Self::State> {
        let mut out = state.clone();
        if let Some(local) = graph.stmt(node).defined_local() {
            if let Some(defs) = out.get_mut(local.0) {
                *defs = BTreeSet::from([DefSite::Node(node)]);
            }
        }
        Transfer::Normal(out)
    }

    fn join(&self, left: &Self::State, right: &Self::State) -> Self::State {
        left.iter()
            .zip(right)
            .map(|(left, right)| left.union(right).copied().collect())
            .collect()
    }
}

/// Reject a read of a local that some path reaches without assigning it.
pub(crate) fn check_definite_assignment(graph: &ControlFlowGraph) -> Result<(), AnalysisError> {
    let solution = solve(graph, &ReachingDefinitions, default_visit_limit(graph))?;
    for node in graph.node_ids() {
        let Some(reaching) = solution.in_state(node) else {
            continue;
        };
        let stmt = graph.stmt(node);
        let undefined = stmt
            .value_boxes()
            .iter()
            .filter_map(|value_box| value_box.operand.and_then(Operand::as_local))
            .find(|local| {
                reaching
                    .get(local.0)
                    .is_some_and(|defs| defs.contains(&DefSite::Undefined))
            });
        if let Some(local) = undefined {
            return Err(AnalysisError::UndefinedLocal {
                method: graph.method.clone(),
                local: graph.local(local).name.clone(),
            });
        }
    }
    Ok(())
}

/// Propagate copies until no use changes. Returns the number of rewritten uses.
pub(crate) fn propagate_copies(graph: &mut ControlFlowGraph) -> Result<usize, AnalysisError> {
    let mut total = 0;
    for _ in 0..=graph.node_count() {
        let changed = propagate_round(graph)?;
        if changed == 0 {
            break;
        }
        total += changed;
    }
    debug!(method = %graph.method, substitutions = total, "copy propagation finished");
    Ok(total)
}

fn propagate_round(graph: &mut ControlFlowGraph) -> Result<usize, AnalysisError> {
    let solution = solve(graph, &ReachingDefinitions, default_visit_limit(graph))?;
    let def_counts = definition_counts(graph);
    let refined = refined_locals(graph);
    let mut rewrites = Vec::new();

    for node in graph.node_ids() {
        let Some(reaching) = solution.in_state(node) else {
            continue;
        };
        let mut stmt = graph.stmt(node).clone();
        let mut changed = 0;
        stmt.for_each_use_mut(|operand| {
            let Some(source) = copy_source(graph, reaching, &def_counts, operand, node) else {
                return;
            };
            if operand.as_local().is_some_and(|local| refined.contains(&local))
                || refined.contains(&source)
            {
                return;
            }
            *operand = Operand::Local(source);
            changed += 1;
        });
        if changed > 0 {
            rewrites.push((node, stmt, changed));
        }
    }

    let mut total = 0;
    for (node, stmt, changed) in rewrites {
        graph.set_stmt(node, stmt);
        total += changed;
    }
    Ok(total)
}

/// Local that may replace `operand` at `use_site`, if any.
fn copy_source(
    graph: &ControlFlowGraph,
    reaching: &[BTreeSet<DefSite>],
    def_counts: &[usize],
    operand: &Operand,
    use_site: NodeId,
) -> Option<LocalId> {
    let local = operand.as_local()?;
    let defs = reaching.get(local.0)?;
    if defs.len() != 1 {
        return None;
    }
    let Some(DefSite::Node(def)) = defs.first().copied() else {
        return None;
    };
    let Stmt::Assign {
        dest: Place::Local(dest),
        src: Expr::Use(Operand::Local(source)),
    } = graph.stmt(def)
    else {
        return None;
    };
    if *dest != local || *source == local || def == use_site {
        return None;
    }
    if def_counts.get(source.0).copied() == Some(1)
        || straight_line_without_def(graph, def, use_site, *source)
    {
        Some(*source)
    } else {
        None
    }
}

/// Whether `to` is reached from `from` through nodes with a single predecessor each,
/// none of which redefines `local`.
fn straight_line_without_def(
    graph: &ControlFlowGraph,
    from: NodeId,
    to: NodeId,
    local: LocalId,
) -> bool {
    let mut current = to;
    for _ in 0..graph.node_count() {
        if graph.predecessor_count(current) != 1 {
            return false;
        }
        let Some(edge) = graph.predecessors(current).next() else {
            return false;
        };
        if edge.from == from {
            return true;
        }
        if graph.stmt(edge.from).defined_local() == Some(local) {
            return false;
        }
        current = edge.from;
    }
    false
}

/// Locals whose nullness some branch of the body refines.
fn refined_locals(graph: &ControlFlowGraph) -> BTreeSet<LocalId> {
    graph
        .node_ids()
        .filter_map(|node| match graph.stmt(node) {
            Stmt::Branch { cond, .. } => cond.refined_local(),
            _ => None,
        })
        .collect()
}

fn definition_counts(graph: &ControlFlowGraph) -> Vec<usize> {
    let mut counts: Vec<usize> = graph
        .locals
        .iter()
        .map(|local| usize::from(local.is_parameter))
        .collect();
    for node in graph.node_ids() {
        if let Some(local) = graph.stmt(node).defined_local() {
            if let Some(count) = counts.get_mut(local.0) {
                *count += 1;
            }
        }
    }
    counts
}
