use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::analysis::AnalysisOptions;
use crate::contracts::{Contract, ContractIndex};
use crate::dataflow::lattice::{Fact, Nullness};
use crate::error::AnalysisError;
use crate::ir::{
    BoxRole, ControlFlowGraph, Expr, InvokeExpr, LocalOrigin, NodeId, Operand, Place, Stmt,
    ValueBoxId,
};
use crate::program::SourceSpan;

/// Contract a violation breaks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum ViolationKind {
    NullArgumentForNonNullParameter,
    NullAssignmentToNonNullVariable,
    NullReturnInNonNullMethod,
    NullableDereference,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ViolationKind::NullArgumentForNonNullParameter => "null argument for @NonNull parameter",
            ViolationKind::NullAssignmentToNonNullVariable => "null assigned to @NonNull variable",
            ViolationKind::NullReturnInNonNullMethod => "null returned from @NonNull method",
            ViolationKind::NullableDereference => "dereference of nullable value",
        };
        f.write_str(text)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Certainty {
    /// Null on every path reaching the statement.
    Definite,
    /// Null on at least one path, or not known to be non-null.
    Possible,
}

/// One broken nullness contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Violation {
    pub(crate) kind: ViolationKind,
    pub(crate) certainty: Certainty,
    /// Source-level rendering of the offending value.
    pub(crate) offending_expr: String,
    /// What the value flows into: parameter, variable, method or dereferenced member.
    pub(crate) target: String,
    pub(crate) value_box: ValueBoxId,
    pub(crate) span: Option<SourceSpan>,
}

/// Walks every reached statement once and compares value-box facts against declared contracts.
///
/// `graph` is the graph the facts were computed on; `source` is the same graph before copy
/// propagation and renders offending values as written.
pub(crate) struct ContractChecker<'a> {
    graph: &'a ControlFlowGraph,
    source: &'a ControlFlowGraph,
    contracts: &'a ContractIndex<'a>,
    return_contract: Contract,
    options: AnalysisOptions,
}

impl<'a> ContractChecker<'a> {
    pub(crate) fn new(
        graph: &'a ControlFlowGraph,
        source: &'a ControlFlowGraph,
        contracts: &'a ContractIndex<'a>,
        return_contract: Contract,
        options: AnalysisOptions,
    ) -> Self {
        Self {
            graph,
            source,
            contracts,
            return_contract,
            options,
        }
    }

    pub(crate) fn check(
        &self,
        facts: &BTreeMap<ValueBoxId, Fact>,
        reached: &[bool],
    ) -> Result<Vec<Violation>, AnalysisError> {
        let mut violations = Vec::new();
        let mut seen = BTreeSet::new();
        for node in self.graph.node_ids() {
            if !reached.get(node.0).copied().unwrap_or(false) {
                continue;
            }
            let stmt = self.graph.stmt(node);
            for (index, value_box) in stmt.value_boxes().iter().enumerate() {
                let id = ValueBoxId { node, index };
                let fact = facts
                    .get(&id)
                    .copied()
                    .ok_or_else(|| AnalysisError::UnvisitedValueBox {
                        method: self.graph.method.clone(),
                        node: node.0,
                        index,
                    })?;
                let Some((kind, target)) = self.required_non_null(stmt, value_box.role) else {
                    continue;
                };
                let Some(certainty) = self.certainty(fact) else {
                    continue;
                };
                let offending_expr = self.offending_expr(node, index);
                if !seen.insert((node, kind, offending_expr.clone())) {
                    continue;
                }
                violations.push(Violation {
                    kind,
                    certainty,
                    offending_expr,
                    target,
                    value_box: id,
                    span: self.graph.span(node),
                });
            }
        }
        Ok(violations)
    }

    /// Contract demanding a non-null value at a box, with a description of what demands it.
    fn required_non_null(&self, stmt: &Stmt, role: BoxRole) -> Option<(ViolationKind, String)> {
        match (role, stmt) {
            (BoxRole::Argument(index), _) => {
                let invoke = invoke_of(stmt)?;
                if !invoke
                    .method
                    .parameters
                    .get(index)
                    .is_some_and(|kind| kind.is_reference())
                {
                    return None;
                }
                let contract = self.contracts.method(
                    &invoke.method.owner,
                    &invoke.method.name,
                    &invoke.method.descriptor,
                );
                (contract.parameter(index) == Contract::NonNull).then(|| {
                    (
                        ViolationKind::NullArgumentForNonNullParameter,
                        format!(
                            "parameter {} of {}.{}{}",
                            index + 1,
                            invoke.method.owner,
                            invoke.method.name,
                            invoke.method.descriptor
                        ),
                    )
                })
            }
            (BoxRole::AssignedValue, Stmt::Assign { dest, .. }) => {
                let (contract, target) = match dest {
                    Place::Local(local) => {
                        let local = self.graph.local(*local);
                        if !local.kind.is_reference() {
                            return None;
                        }
                        (local.contract, format!("variable {}", local.name))
                    }
                    Place::Field { field, .. } => {
                        if !field.kind.is_reference() {
                            return None;
                        }
                        (
                            self.contracts.field(&field.owner, &field.name),
                            format!("field {}.{}", field.owner, field.name),
                        )
                    }
                    Place::Index { .. } => return None,
                };
                (contract == Contract::NonNull)
                    .then_some((ViolationKind::NullAssignmentToNonNullVariable, target))
            }
            (BoxRole::Value, Stmt::Return(Some(_))) => (self.return_contract == Contract::NonNull)
                .then(|| {
                    (
                        ViolationKind::NullReturnInNonNullMethod,
                        format!("method {}", self.graph.method),
                    )
                }),
            (BoxRole::Dereference, _) => Some((
                ViolationKind::NullableDereference,
                dereference_target(stmt),
            )),
            _ => None,
        }
    }

    fn certainty(&self, fact: Fact) -> Option<Certainty> {
        match fact.nullness {
            Nullness::Bottom | Nullness::NonNull => None,
            Nullness::Null => Some(Certainty::Definite),
            Nullness::Top => {
                if self.options.only_treat_nullable_as_possibly_null && !fact.nullable_evidence {
                    return None;
                }
                Some(Certainty::Possible)
            }
        }
    }

    /// Value at `node`'s box `index` as written. Propagation only swaps operands, so box
    /// positions agree between the two graphs.
    fn offending_expr(&self, node: NodeId, index: usize) -> String {
        let stmt = self.source.stmt(node);
        match stmt.value_boxes().get(index).and_then(|value_box| value_box.operand) {
            Some(operand) => self.describe(operand),
            None => match stmt {
                Stmt::Assign { src, .. } => self.source.display_expr(src),
                _ => self.source.display_stmt(node),
            },
        }
    }

    /// Stack temporaries are shown as the expression that produced them.
    fn describe(&self, operand: &Operand) -> String {
        let Some(local) = operand.as_local() else {
            return self.source.display_operand(operand);
        };
        if self.source.local(local).origin == LocalOrigin::StackTemporary {
            let definition = self.source.node_ids().find_map(|node| match self.source.stmt(node) {
                Stmt::Assign {
                    dest: Place::Local(dest),
                    src,
                } if *dest == local => Some(src),
                _ => None,
            });
            if let Some(src) = definition {
                return self.source.display_expr(src);
            }
        }
        self.source.display_operand(operand)
    }
}

fn invoke_of(stmt: &Stmt) -> Option<&InvokeExpr> {
    match stmt {
        Stmt::Invoke(invoke)
        | Stmt::Assign {
            src: Expr::Invoke(invoke),
            ..
        } => Some(invoke),
        _ => None,
    }
}

fn dereference_target(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Assign {
            dest: Place::Field { field, .. },
            ..
        }
        | Stmt::Assign {
            src: Expr::Field { field, .. },
            ..
        } => format!("field {}", field.name),
        Stmt::Assign {
            dest: Place::Index { .. },
            ..
        }
        | Stmt::Assign {
            src: Expr::Index { .. },
            ..
        } => "array access".to_string(),
        Stmt::Throw(_) => "throw".to_string(),
        _ => match invoke_of(stmt) {
            Some(invoke) => format!("call to {}", invoke.method.name),
            None => "dereference".to_string(),
        },
    }
}
