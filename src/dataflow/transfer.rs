use std::collections::BTreeMap;

use crate::contracts::{Contract, ContractIndex};
use crate::dataflow::lattice::{Fact, Nullness};
use crate::dataflow::worklist::{FlowSemantics, Solution, Transfer};
use crate::error::AnalysisError;
use crate::ir::{
    BoxRole, Condition, ControlFlowGraph, Expr, LocalId, NodeId, Operand, Place, Stmt, ValueBoxId,
};
use crate::program::BinaryOp;

/// Facts for every local of one method at one program point.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct NullnessState {
    facts: Vec<Fact>,
}

impl NullnessState {
    pub(crate) fn new(local_count: usize) -> Self {
        Self {
            facts: vec![Fact::BOTTOM; local_count],
        }
    }

    pub(crate) fn fact(&self, local: LocalId) -> Fact {
        self.facts.get(local.0).copied().unwrap_or_default()
    }

    pub(crate) fn set(&mut self, local: LocalId, fact: Fact) {
        if let Some(slot) = self.facts.get_mut(local.0) {
            *slot = fact;
        }
    }

    pub(crate) fn operand(&self, operand: &Operand) -> Fact {
        match operand {
            Operand::Local(local) => self.fact(*local),
            Operand::Const(_) if operand.is_null() => Fact::NULL,
            Operand::Const(_) => Fact::NON_NULL,
        }
    }

    fn join(&self, other: &Self) -> Self {
        let len = self.facts.len().max(other.facts.len());
        let facts = (0..len)
            .map(|index| {
                let local = LocalId(index);
                self.fact(local).join(other.fact(local))
            })
            .collect();
        Self { facts }
    }
}

/// Nullness transfer functions, resolving call and field contracts through the program index.
pub(crate) struct NullnessSemantics<'a> {
    contracts: &'a ContractIndex<'a>,
}

impl<'a> NullnessSemantics<'a> {
    pub(crate) fn new(contracts: &'a ContractIndex<'a>) -> Self {
        Self { contracts }
    }

    /// Fact of the value produced by `expr` when evaluated in `state`.
    pub(crate) fn evaluate(&self, expr: &Expr, state: &NullnessState) -> Fact {
        match expr {
            Expr::Use(operand) | Expr::Cast { value: operand, .. } => state.operand(operand),
            Expr::Field { field, .. } => {
                if !field.kind.is_reference() {
                    return Fact::NON_NULL;
                }
                contract_fact(self.contracts.field(&field.owner, &field.name))
            }
            Expr::Invoke(invoke) => {
                if !invoke.method.return_kind.is_reference() {
                    return Fact::NON_NULL;
                }
                let contract = self.contracts.method(
                    &invoke.method.owner,
                    &invoke.method.name,
                    &invoke.method.descriptor,
                );
                contract_fact(contract.return_contract)
            }
            Expr::Index { .. } => Fact::UNKNOWN,
            Expr::New { .. }
            | Expr::NewArray { .. }
            | Expr::InstanceOf { .. }
            | Expr::Binary { .. }
            | Expr::CaughtException { .. } => Fact::NON_NULL,
        }
    }

    /// Edge states for a branch. Only the refined local changes, and always to a constant fact,
    /// so the refinement never depends on the facts of other locals.
    fn refine_branch(&self, cond: &Condition, state: &NullnessState) -> Transfer<NullnessState> {
        let Some(tested) = cond.refined_local() else {
            return Transfer::Normal(state.clone());
        };
        let mut non_null = state.clone();
        non_null.set(tested, Fact::NON_NULL);
        let mut is_null = state.clone();
        is_null.set(tested, Fact::NULL);
        match cond {
            Condition::Compare {
                op: BinaryOp::Eq, ..
            } => Transfer::Branch {
                on_true: is_null,
                on_false: non_null,
            },
            Condition::Compare { .. } => Transfer::Branch {
                on_true: non_null,
                on_false: is_null,
            },
            Condition::InstanceOf { .. } | Condition::IsTrue(_) => Transfer::Branch {
                on_true: non_null,
                on_false: state.clone(),
            },
        }
    }
}

pub(crate) fn contract_fact(contract: Contract) -> Fact {
    match contract {
        Contract::NonNull => Fact::NON_NULL,
        Contract::Nullable => Fact::NULLABLE,
        Contract::Unspecified => Fact::UNKNOWN,
    }
}

impl FlowSemantics for NullnessSemantics<'_> {
    type State = NullnessState;

    fn initial_state(&self, graph: &ControlFlowGraph) -> NullnessState {
        let mut state = NullnessState::new(graph.locals.len());
        for local in graph.locals.iter().filter(|local| local.is_parameter) {
            let fact = if local.kind.is_reference() {
                contract_fact(local.contract)
            } else {
                Fact::NON_NULL
            };
            state.set(local.id, fact);
        }
        state
    }

    fn transfer(
        &self,
        graph: &ControlFlowGraph,
        node: NodeId,
        state: &NullnessState,
    ) -> Transfer<NullnessState> {
        match graph.stmt(node) {
            Stmt::Assign {
                dest: Place::Local(local),
                src,
            } => {
                let mut out = state.clone();
                out.set(*local, self.evaluate(src, state));
                Transfer::Normal(out)
            }
            Stmt::Branch { cond, .. } => self.refine_branch(cond, state),
            _ => Transfer::Normal(state.clone()),
        }
    }

    fn join(&self, left: &NullnessState, right: &NullnessState) -> NullnessState {
        left.join(right)
    }
}

/// Tag every value-box of every reached node with its fact at the fixed point.
///
/// Use boxes read the in-state; the assigned value and the definition carry the value produced
/// by the right-hand side. A read of a local whose fact is still `Bottom` means no definition
/// reaches it on any path; [`check_definite_assignment`] rejects partial definitions earlier.
///
/// [`check_definite_assignment`]: crate::copy_prop::check_definite_assignment
pub(crate) fn value_box_facts(
    graph: &ControlFlowGraph,
    semantics: &NullnessSemantics<'_>,
    solution: &Solution<NullnessState>,
) -> Result<BTreeMap<ValueBoxId, Fact>, AnalysisError> {
    let mut facts = BTreeMap::new();
    for node in graph.node_ids() {
        let Some(state) = solution.in_state(node) else {
            continue;
        };
        let stmt = graph.stmt(node);
        let produced = match stmt {
            Stmt::Assign { src, .. } => Some(semantics.evaluate(src, state)),
            _ => None,
        };
        for (index, value_box) in stmt.value_boxes().iter().enumerate() {
            let fact = match (value_box.role, value_box.operand) {
                (BoxRole::AssignedValue | BoxRole::Definition, _) => {
                    produced.unwrap_or(Fact::UNKNOWN)
                }
                (_, Some(operand)) => {
                    let fact = state.operand(operand);
                    if let (Some(local), Nullness::Bottom) = (operand.as_local(), fact.nullness) {
                        return Err(AnalysisError::UndefinedLocal {
                            method: graph.method.clone(),
                            local: graph.local(local).name.clone(),
                        });
                    }
                    fact
                }
                (_, None) => Fact::UNKNOWN,
            };
            facts.insert(ValueBoxId { node, index }, fact);
        }
    }
    Ok(facts)
}
