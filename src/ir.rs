use std::fmt;

use crate::contracts::Contract;
use crate::descriptor::TypeKind;
use crate::program::{BinaryOp, SourceSpan};

/// Index of a local slot within one method body.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct LocalId(pub(crate) usize);

/// Index of a statement node within one control-flow graph.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

/// Whether a local came from the source or was introduced while flattening expressions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LocalOrigin {
    Source,
    StackTemporary,
}

/// Typed storage slot owned by one method body.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Local {
    pub(crate) id: LocalId,
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) origin: LocalOrigin,
    pub(crate) contract: Contract,
    pub(crate) is_parameter: bool,
}

/// Literal value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Constant {
    Null,
    Int(i64),
    Bool(bool),
    Str(String),
    Class(String),
}

/// Atomic operand of a three-address statement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operand {
    Local(LocalId),
    Const(Constant),
}

impl Operand {
    pub(crate) fn as_local(&self) -> Option<LocalId> {
        match self {
            Operand::Local(local) => Some(*local),
            Operand::Const(_) => None,
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Operand::Const(Constant::Null))
    }
}

/// Resolved field reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
}

/// Resolved method reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) parameters: Vec<TypeKind>,
    pub(crate) return_kind: TypeKind,
}

/// Invocation classification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum InvokeKind {
    Virtual,
    Special,
    Static,
}

/// Method invocation; `base == None` denotes a static call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InvokeExpr {
    pub(crate) kind: InvokeKind,
    pub(crate) base: Option<Operand>,
    pub(crate) method: MethodRef,
    pub(crate) args: Vec<Operand>,
}

/// Right-hand side of an assignment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Expr {
    Use(Operand),
    Field {
        base: Option<Operand>,
        field: FieldRef,
    },
    Index {
        base: Operand,
        index: Operand,
    },
    Invoke(InvokeExpr),
    Cast {
        descriptor: String,
        value: Operand,
    },
    New {
        class: String,
    },
    NewArray {
        descriptor: String,
        length: Operand,
    },
    InstanceOf {
        class: String,
        value: Operand,
    },
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    CaughtException {
        class: String,
    },
}

impl Expr {
    /// Static type class of the value produced by the expression.
    pub(crate) fn kind(&self) -> TypeKind {
        match self {
            Expr::Use(Operand::Const(Constant::Int(_) | Constant::Bool(_))) => TypeKind::Primitive,
            Expr::Use(_) | Expr::Index { .. } | Expr::Cast { .. } => TypeKind::Reference,
            Expr::Field { field, .. } => field.kind,
            Expr::Invoke(invoke) => invoke.method.return_kind,
            Expr::New { .. } | Expr::NewArray { .. } | Expr::CaughtException { .. } => {
                TypeKind::Reference
            }
            Expr::InstanceOf { .. } | Expr::Binary { .. } => TypeKind::Primitive,
        }
    }
}

/// Storage written by an assignment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Place {
    Local(LocalId),
    Field {
        base: Option<Operand>,
        field: FieldRef,
    },
    Index {
        base: Operand,
        index: Operand,
    },
}

/// Branch condition after short-circuit lowering.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Condition {
    Compare {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    InstanceOf {
        class: String,
        value: Operand,
    },
    IsTrue(Operand),
}

impl Condition {
    /// Local whose nullness the branch outcome decides: the local side of an `==`/`!=` against
    /// the `null` constant, or the tested value of an `instanceof`.
    pub(crate) fn refined_local(&self) -> Option<LocalId> {
        match self {
            Condition::Compare {
                op: BinaryOp::Eq | BinaryOp::Ne,
                lhs,
                rhs,
            } => match (lhs, rhs) {
                (Operand::Local(local), other) | (other, Operand::Local(local))
                    if other.is_null() =>
                {
                    Some(*local)
                }
                _ => None,
            },
            Condition::InstanceOf {
                value: Operand::Local(local),
                ..
            } => Some(*local),
            _ => None,
        }
    }
}

/// One CFG node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Stmt {
    Assign {
        dest: Place,
        src: Expr,
    },
    Invoke(InvokeExpr),
    Branch {
        cond: Condition,
        if_true: NodeId,
        if_false: NodeId,
    },
    Return(Option<Operand>),
    Throw(Operand),
    Nop,
}

impl Stmt {
    /// Whether executing the statement may raise an exception.
    pub(crate) fn can_throw(&self) -> bool {
        match self {
            Stmt::Assign { dest, src } => {
                matches!(
                    dest,
                    Place::Field { base: Some(_), .. } | Place::Index { .. }
                ) || matches!(
                    src,
                    Expr::Field { base: Some(_), .. } | Expr::Index { .. } | Expr::Invoke(_)
                )
            }
            Stmt::Invoke(_) | Stmt::Throw(_) => true,
            Stmt::Branch { .. } | Stmt::Return(_) | Stmt::Nop => false,
        }
    }

    /// Local written by the statement, if any.
    pub(crate) fn defined_local(&self) -> Option<LocalId> {
        match self {
            Stmt::Assign {
                dest: Place::Local(local),
                ..
            } => Some(*local),
            _ => None,
        }
    }

    /// Value-box occurrences of the statement in a stable order.
    pub(crate) fn value_boxes(&self) -> Vec<ValueBox<'_>> {
        let mut boxes = Vec::new();
        match self {
            Stmt::Assign { dest, src } => {
                match dest {
                    Place::Local(_) | Place::Field { base: None, .. } => {}
                    Place::Field {
                        base: Some(base), ..
                    } => boxes.push(ValueBox::operand(BoxRole::Dereference, base)),
                    Place::Index { base, index } => {
                        boxes.push(ValueBox::operand(BoxRole::Dereference, base));
                        boxes.push(ValueBox::operand(BoxRole::Value, index));
                    }
                }
                expr_boxes(src, &mut boxes);
                let assigned = match src {
                    Expr::Use(operand) => Some(operand),
                    _ => None,
                };
                boxes.push(ValueBox {
                    role: BoxRole::AssignedValue,
                    operand: assigned,
                });
                if matches!(dest, Place::Local(_)) {
                    boxes.push(ValueBox {
                        role: BoxRole::Definition,
                        operand: None,
                    });
                }
            }
            Stmt::Invoke(invoke) => invoke_boxes(invoke, &mut boxes),
            Stmt::Branch { cond, .. } => match cond {
                Condition::Compare { lhs, rhs, .. } => {
                    boxes.push(ValueBox::operand(BoxRole::Value, lhs));
                    boxes.push(ValueBox::operand(BoxRole::Value, rhs));
                }
                Condition::InstanceOf { value, .. } | Condition::IsTrue(value) => {
                    boxes.push(ValueBox::operand(BoxRole::Value, value));
                }
            },
            Stmt::Return(Some(value)) => boxes.push(ValueBox::operand(BoxRole::Value, value)),
            Stmt::Throw(value) => boxes.push(ValueBox::operand(BoxRole::Dereference, value)),
            Stmt::Return(None) | Stmt::Nop => {}
        }
        boxes
    }

    /// Visit every operand read by the statement, in value-box order.
    pub(crate) fn for_each_use_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            Stmt::Assign { dest, src } => {
                match dest {
                    Place::Local(_) | Place::Field { base: None, .. } => {}
                    Place::Field {
                        base: Some(base), ..
                    } => f(base),
                    Place::Index { base, index } => {
                        f(base);
                        f(index);
                    }
                }
                expr_uses_mut(src, &mut f);
            }
            Stmt::Invoke(invoke) => invoke_uses_mut(invoke, &mut f),
            Stmt::Branch { cond, .. } => match cond {
                Condition::Compare { lhs, rhs, .. } => {
                    f(lhs);
                    f(rhs);
                }
                Condition::InstanceOf { value, .. } | Condition::IsTrue(value) => f(value),
            },
            Stmt::Return(Some(value)) | Stmt::Throw(value) => f(value),
            Stmt::Return(None) | Stmt::Nop => {}
        }
    }
}

fn expr_boxes<'a>(expr: &'a Expr, boxes: &mut Vec<ValueBox<'a>>) {
    match expr {
        Expr::Use(operand)
        | Expr::Cast { value: operand, .. }
        | Expr::NewArray {
            length: operand, ..
        }
        | Expr::InstanceOf { value: operand, .. } => {
            boxes.push(ValueBox::operand(BoxRole::Value, operand))
        }
        Expr::Field {
            base: Some(base), ..
        } => boxes.push(ValueBox::operand(BoxRole::Dereference, base)),
        Expr::Index { base, index } => {
            boxes.push(ValueBox::operand(BoxRole::Dereference, base));
            boxes.push(ValueBox::operand(BoxRole::Value, index));
        }
        Expr::Invoke(invoke) => invoke_boxes(invoke, boxes),
        Expr::Binary { lhs, rhs, .. } => {
            boxes.push(ValueBox::operand(BoxRole::Value, lhs));
            boxes.push(ValueBox::operand(BoxRole::Value, rhs));
        }
        Expr::Field { base: None, .. } | Expr::New { .. } | Expr::CaughtException { .. } => {}
    }
}

fn invoke_boxes<'a>(invoke: &'a InvokeExpr, boxes: &mut Vec<ValueBox<'a>>) {
    if let Some(base) = &invoke.base {
        boxes.push(ValueBox::operand(BoxRole::Dereference, base));
    }
    for (index, arg) in invoke.args.iter().enumerate() {
        boxes.push(ValueBox::operand(BoxRole::Argument(index), arg));
    }
}

fn expr_uses_mut(expr: &mut Expr, f: &mut impl FnMut(&mut Operand)) {
    match expr {
        Expr::Use(operand)
        | Expr::Cast { value: operand, .. }
        | Expr::NewArray {
            length: operand, ..
        }
        | Expr::InstanceOf { value: operand, .. }
        | Expr::Field {
            base: Some(operand),
            ..
        } => f(operand),
        Expr::Index { base, index } => {
            f(base);
            f(index);
        }
        Expr::Invoke(invoke) => invoke_uses_mut(invoke, f),
        Expr::Binary { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Expr::Field { base: None, .. } | Expr::New { .. } | Expr::CaughtException { .. } => {}
    }
}

fn invoke_uses_mut(invoke: &mut InvokeExpr, f: &mut impl FnMut(&mut Operand)) {
    if let Some(base) = invoke.base.as_mut() {
        f(base);
    }
    for arg in &mut invoke.args {
        f(arg);
    }
}

/// How a value-box participates in its statement.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum BoxRole {
    /// Receiver of a call, field or array access, or thrown value.
    Dereference,
    /// Argument at the given position of a call.
    Argument(usize),
    /// Any other read of an operand.
    Value,
    /// Value produced by the right-hand side of an assignment.
    AssignedValue,
    /// Local written by an assignment, after the write.
    Definition,
}

/// One use or def occurrence within a statement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ValueBox<'a> {
    pub(crate) role: BoxRole,
    pub(crate) operand: Option<&'a Operand>,
}

impl<'a> ValueBox<'a> {
    fn operand(role: BoxRole, operand: &'a Operand) -> Self {
        Self {
            role,
            operand: Some(operand),
        }
    }
}

/// Identity of a value-box: statement plus position in [`Stmt::value_boxes`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ValueBoxId {
    pub(crate) node: NodeId,
    pub(crate) index: usize,
}

/// Edge classification.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum EdgeKind {
    FallThrough,
    BranchTrue,
    BranchFalse,
    Exception,
}

/// Directed CFG edge between two statements.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct FlowEdge {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
    pub(crate) kind: EdgeKind,
}

/// Control-flow graph of one method body: one node per statement.
#[derive(Clone, Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) method: String,
    pub(crate) locals: Vec<Local>,
    pub(crate) nodes: Vec<Stmt>,
    /// Source position of each node, indexed like `nodes`.
    pub(crate) spans: Vec<Option<SourceSpan>>,
    pub(crate) edges: Vec<FlowEdge>,
    pub(crate) entry: NodeId,
    pub(crate) exit: NodeId,
    pub(crate) exceptional_exit: NodeId,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
}

impl ControlFlowGraph {
    pub(crate) fn new(
        method: String,
        locals: Vec<Local>,
        nodes: Vec<Stmt>,
        spans: Vec<Option<SourceSpan>>,
        mut edges: Vec<FlowEdge>,
        entry: NodeId,
        exit: NodeId,
        exceptional_exit: NodeId,
    ) -> Self {
        edges.sort();
        edges.dedup();
        let mut successors = vec![Vec::new(); nodes.len()];
        let mut predecessors = vec![Vec::new(); nodes.len()];
        for (index, edge) in edges.iter().enumerate() {
            if let Some(list) = successors.get_mut(edge.from.0) {
                list.push(index);
            }
            if let Some(list) = predecessors.get_mut(edge.to.0) {
                list.push(index);
            }
        }
        Self {
            method,
            locals,
            nodes,
            spans,
            edges,
            entry,
            exit,
            exceptional_exit,
            successors,
            predecessors,
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn stmt(&self, node: NodeId) -> &Stmt {
        &self.nodes[node.0]
    }

    pub(crate) fn span(&self, node: NodeId) -> Option<SourceSpan> {
        self.spans.get(node.0).copied().flatten()
    }

    pub(crate) fn local(&self, local: LocalId) -> &Local {
        &self.locals[local.0]
    }

    /// Outgoing edges of a node.
    pub(crate) fn successors(&self, node: NodeId) -> impl Iterator<Item = &FlowEdge> + '_ {
        self.successors[node.0].iter().map(|index| &self.edges[*index])
    }

    /// Incoming edges of a node.
    pub(crate) fn predecessors(&self, node: NodeId) -> impl Iterator<Item = &FlowEdge> + '_ {
        self.predecessors[node.0]
            .iter()
            .map(|index| &self.edges[*index])
    }

    pub(crate) fn predecessor_count(&self, node: NodeId) -> usize {
        self.predecessors[node.0].len()
    }

    pub(crate) fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub(crate) fn set_stmt(&mut self, node: NodeId, stmt: Stmt) {
        self.nodes[node.0] = stmt;
    }

    /// Check the structural invariants the solver relies on.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let count = self.nodes.len();
        for edge in &self.edges {
            if edge.from.0 >= count || edge.to.0 >= count {
                return Err(format!("edge {:?} -> {:?} leaves the graph", edge.from, edge.to));
            }
        }
        if self.spans.len() != count {
            return Err("span table does not match node count".to_string());
        }
        for node in self.node_ids() {
            if let Stmt::Branch {
                if_true, if_false, ..
            } = self.stmt(node)
            {
                let has = |kind: EdgeKind, target: NodeId| {
                    self.successors(node)
                        .any(|edge| edge.kind == kind && edge.to == target)
                };
                if !has(EdgeKind::BranchTrue, *if_true) || !has(EdgeKind::BranchFalse, *if_false)
                {
                    return Err(format!("branch {node:?} targets disagree with its edges"));
                }
            }
            let mut invalid_operand = None;
            let mut stmt = self.stmt(node).clone();
            stmt.for_each_use_mut(|operand| {
                if let Some(local) = operand.as_local() {
                    if local.0 >= self.locals.len() {
                        invalid_operand = Some(local);
                    }
                }
            });
            if let Some(local) = invalid_operand {
                return Err(format!("{node:?} reads unknown local slot {}", local.0));
            }
        }
        Ok(())
    }

    pub(crate) fn display_operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Local(local) => self
                .locals
                .get(local.0)
                .map(|local| local.name.clone())
                .unwrap_or_else(|| format!("${}", local.0)),
            Operand::Const(constant) => constant.to_string(),
        }
    }

    fn display_invoke(&self, invoke: &InvokeExpr) -> String {
        let args: Vec<String> = invoke
            .args
            .iter()
            .map(|arg| self.display_operand(arg))
            .collect();
        let target = match &invoke.base {
            Some(base) => self.display_operand(base),
            None => invoke.method.owner.clone(),
        };
        format!("{}.{}({})", target, invoke.method.name, args.join(", "))
    }

    fn display_access(&self, base: &Option<Operand>, field: &FieldRef) -> String {
        match base {
            Some(base) => format!("{}.{}", self.display_operand(base), field.name),
            None => format!("{}.{}", field.owner, field.name),
        }
    }

    pub(crate) fn display_expr(&self, expr: &Expr) -> String {
        let op = |operand: &Operand| self.display_operand(operand);
        match expr {
            Expr::Use(operand) => op(operand),
            Expr::Field { base, field } => self.display_access(base, field),
            Expr::Index { base, index } => format!("{}[{}]", op(base), op(index)),
            Expr::Invoke(call) => self.display_invoke(call),
            Expr::Cast { descriptor, value } => format!("({}) {}", descriptor, op(value)),
            Expr::New { class } => format!("new {class}"),
            Expr::NewArray { descriptor, length } => format!("new {}[{}]", descriptor, op(length)),
            Expr::InstanceOf { class, value } => format!("{} instanceof {}", op(value), class),
            Expr::Binary { op: binary, lhs, rhs } => {
                format!("{} {} {}", op(lhs), binary_symbol(*binary), op(rhs))
            }
            Expr::CaughtException { class } => format!("@caught {class}"),
        }
    }

    /// Render a statement for messages and debug logs.
    pub(crate) fn display_stmt(&self, node: NodeId) -> String {
        let op = |operand: &Operand| self.display_operand(operand);
        match self.stmt(node) {
            Stmt::Assign { dest, src } => {
                let dest = match dest {
                    Place::Local(local) => op(&Operand::Local(*local)),
                    Place::Field { base, field } => self.display_access(base, field),
                    Place::Index { base, index } => format!("{}[{}]", op(base), op(index)),
                };
                format!("{} = {}", dest, self.display_expr(src))
            }
            Stmt::Invoke(call) => self.display_invoke(call),
            Stmt::Branch {
                cond,
                if_true,
                if_false,
            } => {
                let cond = match cond {
                    Condition::Compare { op: binary, lhs, rhs } => {
                        format!("{} {} {}", op(lhs), binary_symbol(*binary), op(rhs))
                    }
                    Condition::InstanceOf { class, value } => {
                        format!("{} instanceof {}", op(value), class)
                    }
                    Condition::IsTrue(value) => op(value),
                };
                format!("if {} goto {} else {}", cond, if_true.0, if_false.0)
            }
            Stmt::Return(Some(value)) => format!("return {}", op(value)),
            Stmt::Return(None) => "return".to_string(),
            Stmt::Throw(value) => format!("throw {}", op(value)),
            Stmt::Nop => "nop".to_string(),
        }
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Bool(value) => write!(f, "{value}"),
            Constant::Str(value) => write!(f, "{value:?}"),
            Constant::Class(name) => write!(f, "{name}.class"),
        }
    }
}
