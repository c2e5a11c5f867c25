//! Lowering of normalized method bodies into the statement-level control-flow graph.
//!
//! Every statement becomes one node. Nested expressions are flattened into stack temporaries in
//! evaluation order, short-circuit operators become explicit branch nodes, and every statement
//! that can throw gets exception edges to the enclosing handlers (or the exceptional exit).

use std::collections::BTreeMap;
use std::mem;

use crate::contracts::Contract;
use crate::descriptor::{TypeKind, method_shape, value_type_kind};
use crate::error::AnalysisError;
use crate::ir::{
    Condition, Constant, ControlFlowGraph, EdgeKind, Expr, FieldRef, FlowEdge, InvokeExpr,
    InvokeKind, Local, LocalId, LocalOrigin, MethodRef, NodeId, Operand, Place, Stmt,
};
use crate::program::{ClassDecl, MethodDecl, SourceExpr, SourceSpan, SourceStmt, StmtKind};

const CATCH_ALL: &str = "java/lang/Throwable";
const UNPATCHED: NodeId = NodeId(usize::MAX);

/// Build the control-flow graph of a method with a body.
pub(crate) fn build_cfg(
    class: &ClassDecl,
    method: &MethodDecl,
    body: &[SourceStmt],
) -> Result<ControlFlowGraph, AnalysisError> {
    let mut builder = CfgBuilder::new(format!(
        "{}.{}{}",
        class.name, method.name, method.descriptor
    ));
    builder.current_span = method.span;
    builder.declare_parameters(method)?;
    builder.lower_block(body)?;
    builder.finish()
}

/// Predecessor waiting for the next node to be emitted.
#[derive(Copy, Clone, Debug)]
struct Pending {
    from: NodeId,
    kind: EdgeKind,
}

/// Branch exits of a lowered condition.
struct ConditionExits {
    on_true: Vec<Pending>,
    on_false: Vec<Pending>,
}

struct LoopFrame {
    continue_target: Option<NodeId>,
    continues: Vec<Pending>,
    breaks: Vec<Pending>,
}

struct HandlerFrame {
    handlers: Vec<NodeId>,
    catches_all: bool,
}

struct CfgBuilder {
    method: String,
    locals: Vec<Local>,
    scopes: Vec<BTreeMap<String, LocalId>>,
    nodes: Vec<Stmt>,
    spans: Vec<Option<SourceSpan>>,
    edges: Vec<FlowEdge>,
    pending: Vec<Pending>,
    loops: Vec<LoopFrame>,
    handlers: Vec<HandlerFrame>,
    current_span: Option<SourceSpan>,
    entry: NodeId,
    exit: NodeId,
    exceptional_exit: NodeId,
    this_local: Option<LocalId>,
    temp_count: usize,
}

impl CfgBuilder {
    fn new(method: String) -> Self {
        let mut builder = Self {
            method,
            locals: Vec::new(),
            scopes: vec![BTreeMap::new()],
            nodes: Vec::new(),
            spans: Vec::new(),
            edges: Vec::new(),
            pending: Vec::new(),
            loops: Vec::new(),
            handlers: Vec::new(),
            current_span: None,
            entry: NodeId(0),
            exit: NodeId(0),
            exceptional_exit: NodeId(0),
            this_local: None,
            temp_count: 0,
        };
        builder.entry = builder.alloc(Stmt::Nop);
        builder.exit = builder.alloc(Stmt::Nop);
        builder.exceptional_exit = builder.alloc(Stmt::Nop);
        builder.pending.push(Pending {
            from: builder.entry,
            kind: EdgeKind::FallThrough,
        });
        builder
    }

    fn declare_parameters(&mut self, method: &MethodDecl) -> Result<(), AnalysisError> {
        let shape = method_shape(&method.descriptor)?;
        if method.params.len() > shape.parameters.len() {
            return Err(self.malformed(format!(
                "{} parameters declared for descriptor {}",
                method.params.len(),
                method.descriptor
            )));
        }
        if !method.is_static {
            let this = self.declare(
                "this".to_string(),
                TypeKind::Reference,
                LocalOrigin::Source,
                Contract::NonNull,
            );
            self.locals[this.0].is_parameter = true;
            self.this_local = Some(this);
        }
        for (index, kind) in shape.parameters.iter().enumerate() {
            let (name, contract) = match method.params.get(index) {
                Some(param) => (
                    param.name.clone(),
                    Contract::from_annotations(&param.annotations),
                ),
                None => (format!("arg{index}"), Contract::Unspecified),
            };
            let local = self.declare(name, *kind, LocalOrigin::Source, contract);
            self.locals[local.0].is_parameter = true;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<ControlFlowGraph, AnalysisError> {
        let pending = mem::take(&mut self.pending);
        self.connect_all(pending, self.exit);
        let graph = ControlFlowGraph::new(
            self.method,
            self.locals,
            self.nodes,
            self.spans,
            self.edges,
            self.entry,
            self.exit,
            self.exceptional_exit,
        );
        graph
            .validate()
            .map_err(|detail| AnalysisError::MalformedGraph {
                method: graph.method.clone(),
                detail,
            })?;
        Ok(graph)
    }

    // === locals ===

    fn declare(
        &mut self,
        name: String,
        kind: TypeKind,
        origin: LocalOrigin,
        contract: Contract,
    ) -> LocalId {
        let id = LocalId(self.locals.len());
        if origin == LocalOrigin::Source {
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name.clone(), id);
            }
        }
        self.locals.push(Local {
            id,
            name,
            kind,
            origin,
            contract,
            is_parameter: false,
        });
        id
    }

    fn temp(&mut self, kind: TypeKind) -> LocalId {
        let name = format!("$t{}", self.temp_count);
        self.temp_count += 1;
        self.declare(name, kind, LocalOrigin::StackTemporary, Contract::Unspecified)
    }

    fn lookup(&self, name: &str) -> Result<LocalId, AnalysisError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .ok_or_else(|| AnalysisError::UnknownLocal {
                method: self.method.clone(),
                name: name.to_string(),
            })
    }

    fn this(&self) -> Result<LocalId, AnalysisError> {
        self.this_local.ok_or_else(|| AnalysisError::UnknownLocal {
            method: self.method.clone(),
            name: "this".to_string(),
        })
    }

    fn malformed(&self, detail: String) -> AnalysisError {
        AnalysisError::MalformedGraph {
            method: self.method.clone(),
            detail,
        }
    }

    // === nodes and edges ===

    fn alloc(&mut self, stmt: Stmt) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(stmt);
        self.spans.push(self.current_span);
        id
    }

    /// Append a statement after every pending predecessor.
    fn emit(&mut self, stmt: Stmt) -> NodeId {
        let can_throw = stmt.can_throw();
        let returns = matches!(stmt, Stmt::Return(_));
        let falls_through = !matches!(stmt, Stmt::Return(_) | Stmt::Throw(_) | Stmt::Branch { .. });
        let id = self.alloc(stmt);
        let pending = mem::take(&mut self.pending);
        self.connect_all(pending, id);
        if can_throw {
            self.exception_edges(id);
        }
        if returns {
            self.edge(id, self.exit, EdgeKind::FallThrough);
        }
        if falls_through {
            self.pending.push(Pending {
                from: id,
                kind: EdgeKind::FallThrough,
            });
        }
        id
    }

    fn emit_branch(&mut self, cond: Condition) -> ConditionExits {
        let id = self.emit(Stmt::Branch {
            cond,
            if_true: UNPATCHED,
            if_false: UNPATCHED,
        });
        ConditionExits {
            on_true: vec![Pending {
                from: id,
                kind: EdgeKind::BranchTrue,
            }],
            on_false: vec![Pending {
                from: id,
                kind: EdgeKind::BranchFalse,
            }],
        }
    }

    fn edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.push(FlowEdge { from, to, kind });
    }

    fn connect_all(&mut self, pending: Vec<Pending>, to: NodeId) {
        for item in pending {
            self.edge(item.from, to, item.kind);
            if let Stmt::Branch {
                if_true, if_false, ..
            } = &mut self.nodes[item.from.0]
            {
                match item.kind {
                    EdgeKind::BranchTrue => *if_true = to,
                    EdgeKind::BranchFalse => *if_false = to,
                    EdgeKind::FallThrough | EdgeKind::Exception => {}
                }
            }
        }
    }

    fn exception_edges(&mut self, from: NodeId) {
        let mut targets = Vec::new();
        let mut caught = false;
        for frame in self.handlers.iter().rev() {
            targets.extend(frame.handlers.iter().copied());
            if frame.catches_all {
                caught = true;
                break;
            }
        }
        if !caught {
            targets.push(self.exceptional_exit);
        }
        for target in targets {
            self.edge(from, target, EdgeKind::Exception);
        }
    }

    // === statements ===

    fn lower_block(&mut self, body: &[SourceStmt]) -> Result<(), AnalysisError> {
        self.scopes.push(BTreeMap::new());
        let result = body.iter().try_for_each(|stmt| self.lower_stmt(stmt));
        self.scopes.pop();
        result
    }

    fn lower_stmt(&mut self, stmt: &SourceStmt) -> Result<(), AnalysisError> {
        let saved = self.current_span;
        if stmt.span.is_some() {
            self.current_span = stmt.span;
        }
        let result = self.lower_stmt_kind(&stmt.kind);
        self.current_span = saved;
        result
    }

    fn lower_stmt_kind(&mut self, kind: &StmtKind) -> Result<(), AnalysisError> {
        match kind {
            StmtKind::Local {
                name,
                descriptor,
                annotations,
                init,
            } => {
                let kind = value_type_kind(descriptor)?;
                let value = init.as_ref().map(|init| self.lower_expr(init)).transpose()?;
                let local = self.declare(
                    name.clone(),
                    kind,
                    LocalOrigin::Source,
                    Contract::from_annotations(annotations),
                );
                if let Some(value) = value {
                    self.emit(Stmt::Assign {
                        dest: Place::Local(local),
                        src: value,
                    });
                }
            }
            StmtKind::Assign { target, value } => self.lower_assign(target, value)?,
            StmtKind::Expr { expr } => self.lower_effect(expr)?,
            StmtKind::Block { body } => self.lower_block(body)?,
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let exits = self.lower_condition(cond)?;
                self.pending = exits.on_true;
                self.lower_block(then)?;
                let after_then = mem::take(&mut self.pending);
                self.pending = exits.on_false;
                self.lower_block(otherwise)?;
                self.pending.extend(after_then);
            }
            StmtKind::While { cond, body } => {
                let header = self.emit(Stmt::Nop);
                let exits = self.lower_condition(cond)?;
                self.loops.push(LoopFrame {
                    continue_target: Some(header),
                    continues: Vec::new(),
                    breaks: Vec::new(),
                });
                self.pending = exits.on_true;
                let lowered = self.lower_block(body);
                let frame = self.pop_loop();
                lowered?;
                let back = mem::take(&mut self.pending);
                self.connect_all(back, header);
                self.pending = exits.on_false;
                self.pending.extend(frame.breaks);
            }
            StmtKind::DoWhile { body, cond } => {
                let header = self.emit(Stmt::Nop);
                self.loops.push(LoopFrame {
                    continue_target: None,
                    continues: Vec::new(),
                    breaks: Vec::new(),
                });
                let lowered = self.lower_block(body);
                let frame = self.pop_loop();
                lowered?;
                self.pending.extend(frame.continues);
                self.emit(Stmt::Nop);
                let exits = self.lower_condition(cond)?;
                self.connect_all(exits.on_true, header);
                self.pending = exits.on_false;
                self.pending.extend(frame.breaks);
            }
            StmtKind::Try { body, catches } => {
                let mut handlers = Vec::with_capacity(catches.len());
                for catch in catches {
                    let local = self.declare(
                        catch.name.clone(),
                        TypeKind::Reference,
                        LocalOrigin::Source,
                        Contract::Unspecified,
                    );
                    // Bound again inside the catch scope below.
                    if let Some(scope) = self.scopes.last_mut() {
                        scope.remove(&catch.name);
                    }
                    let handler = self.alloc(Stmt::Assign {
                        dest: Place::Local(local),
                        src: Expr::CaughtException {
                            class: catch.class.clone(),
                        },
                    });
                    handlers.push((handler, local));
                }
                self.handlers.push(HandlerFrame {
                    handlers: handlers.iter().map(|(handler, _)| *handler).collect(),
                    catches_all: catches.iter().any(|catch| catch.class == CATCH_ALL),
                });
                let lowered = self.lower_block(body);
                self.handlers.pop();
                lowered?;
                let mut after = mem::take(&mut self.pending);
                for (catch, (handler, local)) in catches.iter().zip(handlers) {
                    self.pending = vec![Pending {
                        from: handler,
                        kind: EdgeKind::FallThrough,
                    }];
                    self.scopes
                        .push(BTreeMap::from([(catch.name.clone(), local)]));
                    let lowered = self.lower_block(&catch.body);
                    self.scopes.pop();
                    lowered?;
                    after.append(&mut self.pending);
                }
                self.pending = after;
            }
            StmtKind::Return { value } => {
                let value = value
                    .as_ref()
                    .map(|value| self.lower_operand(value))
                    .transpose()?;
                self.emit(Stmt::Return(value));
            }
            StmtKind::Throw { value } => {
                let value = self.lower_operand(value)?;
                self.emit(Stmt::Throw(value));
            }
            StmtKind::Break => {
                let pending = mem::take(&mut self.pending);
                let frame = self.current_loop("break")?;
                frame.breaks.extend(pending);
            }
            StmtKind::Continue => {
                let pending = mem::take(&mut self.pending);
                let target = self.current_loop("continue")?.continue_target;
                match target {
                    Some(target) => self.connect_all(pending, target),
                    None => self.current_loop("continue")?.continues.extend(pending),
                }
            }
        }
        Ok(())
    }

    fn current_loop(&mut self, keyword: &'static str) -> Result<&mut LoopFrame, AnalysisError> {
        let method = self.method.clone();
        self.loops
            .last_mut()
            .ok_or(AnalysisError::InvalidControlTransfer { method, keyword })
    }

    fn pop_loop(&mut self) -> LoopFrame {
        self.loops.pop().unwrap_or(LoopFrame {
            continue_target: None,
            continues: Vec::new(),
            breaks: Vec::new(),
        })
    }

    fn lower_assign(&mut self, target: &SourceExpr, value: &SourceExpr) -> Result<(), AnalysisError> {
        match target {
            SourceExpr::Local { name } => {
                let local = self.lookup(name)?;
                let src = self.lower_expr(value)?;
                self.emit(Stmt::Assign {
                    dest: Place::Local(local),
                    src,
                });
            }
            SourceExpr::Field {
                base,
                owner,
                name,
                descriptor,
            } => {
                let base = base
                    .as_deref()
                    .map(|base| self.lower_operand(base))
                    .transpose()?;
                let field = field_ref(owner, name, descriptor)?;
                let value = self.lower_operand(value)?;
                self.emit(Stmt::Assign {
                    dest: Place::Field { base, field },
                    src: Expr::Use(value),
                });
            }
            SourceExpr::Index { base, index } => {
                let base = self.lower_operand(base)?;
                let index = self.lower_operand(index)?;
                let value = self.lower_operand(value)?;
                self.emit(Stmt::Assign {
                    dest: Place::Index { base, index },
                    src: Expr::Use(value),
                });
            }
            other => {
                return Err(self.malformed(format!("invalid assignment target {other:?}")));
            }
        }
        Ok(())
    }

    /// Lower an expression evaluated only for its side effects.
    fn lower_effect(&mut self, expr: &SourceExpr) -> Result<(), AnalysisError> {
        match expr {
            SourceExpr::Call {
                base,
                owner,
                name,
                descriptor,
                args,
            } => {
                let invoke = self.lower_invoke(base.as_deref(), owner, name, descriptor, args)?;
                self.emit(Stmt::Invoke(invoke));
            }
            _ => {
                self.lower_operand(expr)?;
            }
        }
        Ok(())
    }

    // === expressions ===

    fn lower_operand(&mut self, expr: &SourceExpr) -> Result<Operand, AnalysisError> {
        let lowered = self.lower_expr(expr)?;
        if let Expr::Use(operand) = lowered {
            return Ok(operand);
        }
        let temp = self.temp(lowered.kind());
        self.emit(Stmt::Assign {
            dest: Place::Local(temp),
            src: lowered,
        });
        Ok(Operand::Local(temp))
    }

    fn lower_expr(&mut self, expr: &SourceExpr) -> Result<Expr, AnalysisError> {
        let lowered = match expr {
            SourceExpr::Null => Expr::Use(Operand::Const(Constant::Null)),
            SourceExpr::Int { value } => Expr::Use(Operand::Const(Constant::Int(*value))),
            SourceExpr::Bool { value } => Expr::Use(Operand::Const(Constant::Bool(*value))),
            SourceExpr::Str { value } => Expr::Use(Operand::Const(Constant::Str(value.clone()))),
            SourceExpr::Class { name } => Expr::Use(Operand::Const(Constant::Class(name.clone()))),
            SourceExpr::This => Expr::Use(Operand::Local(self.this()?)),
            SourceExpr::Local { name } => Expr::Use(Operand::Local(self.lookup(name)?)),
            SourceExpr::Field {
                base,
                owner,
                name,
                descriptor,
            } => {
                let base = base
                    .as_deref()
                    .map(|base| self.lower_operand(base))
                    .transpose()?;
                Expr::Field {
                    base,
                    field: field_ref(owner, name, descriptor)?,
                }
            }
            SourceExpr::Call {
                base,
                owner,
                name,
                descriptor,
                args,
            } => Expr::Invoke(self.lower_invoke(base.as_deref(), owner, name, descriptor, args)?),
            SourceExpr::New {
                class,
                descriptor,
                args,
            } => {
                let object = self.temp(TypeKind::Reference);
                self.emit(Stmt::Assign {
                    dest: Place::Local(object),
                    src: Expr::New {
                        class: class.clone(),
                    },
                });
                let mut invoke = self.lower_invoke(None, class, "<init>", descriptor, args)?;
                invoke.kind = InvokeKind::Special;
                invoke.base = Some(Operand::Local(object));
                self.emit(Stmt::Invoke(invoke));
                Expr::Use(Operand::Local(object))
            }
            SourceExpr::NewArray { descriptor, length } => Expr::NewArray {
                descriptor: descriptor.clone(),
                length: self.lower_operand(length)?,
            },
            SourceExpr::Index { base, index } => {
                let base = self.lower_operand(base)?;
                let index = self.lower_operand(index)?;
                Expr::Index { base, index }
            }
            SourceExpr::Cast { descriptor, value } => Expr::Cast {
                descriptor: descriptor.clone(),
                value: self.lower_operand(value)?,
            },
            SourceExpr::InstanceOf { class, value } => Expr::InstanceOf {
                class: class.clone(),
                value: self.lower_operand(value)?,
            },
            SourceExpr::Binary { op, lhs, rhs } => {
                let lhs = self.lower_operand(lhs)?;
                let rhs = self.lower_operand(rhs)?;
                Expr::Binary { op: *op, lhs, rhs }
            }
            SourceExpr::And { .. } | SourceExpr::Or { .. } | SourceExpr::Not { .. } => {
                self.materialize_condition(expr)?
            }
            SourceExpr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let result = self.temp(TypeKind::Reference);
                let exits = self.lower_condition(cond)?;
                self.pending = exits.on_true;
                let then_value = self.lower_expr(then)?;
                self.locals[result.0].kind = then_value.kind();
                self.emit(Stmt::Assign {
                    dest: Place::Local(result),
                    src: then_value,
                });
                let after_then = mem::take(&mut self.pending);
                self.pending = exits.on_false;
                let else_value = self.lower_expr(otherwise)?;
                self.emit(Stmt::Assign {
                    dest: Place::Local(result),
                    src: else_value,
                });
                self.pending.extend(after_then);
                Expr::Use(Operand::Local(result))
            }
        };
        Ok(lowered)
    }

    fn lower_invoke(
        &mut self,
        base: Option<&SourceExpr>,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: &[SourceExpr],
    ) -> Result<InvokeExpr, AnalysisError> {
        let shape = method_shape(descriptor)?;
        if shape.parameters.len() != args.len() {
            return Err(self.malformed(format!(
                "call to {owner}.{name}{descriptor} passes {} arguments",
                args.len()
            )));
        }
        let base = base.map(|base| self.lower_operand(base)).transpose()?;
        let args = args
            .iter()
            .map(|arg| self.lower_operand(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let kind = match (&base, name) {
            (None, _) => InvokeKind::Static,
            (Some(_), "<init>") => InvokeKind::Special,
            (Some(_), _) => InvokeKind::Virtual,
        };
        Ok(InvokeExpr {
            kind,
            base,
            method: MethodRef {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                parameters: shape.parameters,
                return_kind: shape.return_kind,
            },
            args,
        })
    }

    /// Lower a boolean-valued expression into branch exits.
    fn lower_condition(&mut self, expr: &SourceExpr) -> Result<ConditionExits, AnalysisError> {
        let exits = match expr {
            SourceExpr::And { lhs, rhs } => {
                let left = self.lower_condition(lhs)?;
                self.pending = left.on_true;
                let mut right = self.lower_condition(rhs)?;
                let mut on_false = left.on_false;
                on_false.append(&mut right.on_false);
                ConditionExits {
                    on_true: right.on_true,
                    on_false,
                }
            }
            SourceExpr::Or { lhs, rhs } => {
                let left = self.lower_condition(lhs)?;
                self.pending = left.on_false;
                let mut right = self.lower_condition(rhs)?;
                let mut on_true = left.on_true;
                on_true.append(&mut right.on_true);
                ConditionExits {
                    on_true,
                    on_false: right.on_false,
                }
            }
            SourceExpr::Not { value } => {
                let inner = self.lower_condition(value)?;
                ConditionExits {
                    on_true: inner.on_false,
                    on_false: inner.on_true,
                }
            }
            SourceExpr::Bool { value } => {
                let pending = mem::take(&mut self.pending);
                if *value {
                    ConditionExits {
                        on_true: pending,
                        on_false: Vec::new(),
                    }
                } else {
                    ConditionExits {
                        on_true: Vec::new(),
                        on_false: pending,
                    }
                }
            }
            SourceExpr::Binary { op, lhs, rhs } if op.is_comparison() => {
                let lhs = self.lower_operand(lhs)?;
                let rhs = self.lower_operand(rhs)?;
                self.emit_branch(Condition::Compare { op: *op, lhs, rhs })
            }
            SourceExpr::InstanceOf { class, value } => {
                let value = self.lower_operand(value)?;
                self.emit_branch(Condition::InstanceOf {
                    class: class.clone(),
                    value,
                })
            }
            SourceExpr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let test = self.lower_condition(cond)?;
                self.pending = test.on_true;
                let mut when_true = self.lower_condition(then)?;
                self.pending = test.on_false;
                let mut when_false = self.lower_condition(otherwise)?;
                when_true.on_true.append(&mut when_false.on_true);
                when_true.on_false.append(&mut when_false.on_false);
                when_true
            }
            _ => {
                let value = self.lower_operand(expr)?;
                self.emit_branch(Condition::IsTrue(value))
            }
        };
        Ok(exits)
    }

    /// Evaluate a short-circuit condition into a boolean temporary.
    fn materialize_condition(&mut self, expr: &SourceExpr) -> Result<Expr, AnalysisError> {
        let result = self.temp(TypeKind::Primitive);
        let exits = self.lower_condition(expr)?;
        self.pending = exits.on_true;
        self.emit(Stmt::Assign {
            dest: Place::Local(result),
            src: Expr::Use(Operand::Const(Constant::Bool(true))),
        });
        let after_true = mem::take(&mut self.pending);
        self.pending = exits.on_false;
        self.emit(Stmt::Assign {
            dest: Place::Local(result),
            src: Expr::Use(Operand::Const(Constant::Bool(false))),
        });
        self.pending.extend(after_true);
        Ok(Expr::Use(Operand::Local(result)))
    }
}

fn field_ref(owner: &str, name: &str, descriptor: &str) -> Result<FieldRef, AnalysisError> {
    Ok(FieldRef {
        owner: owner.to_string(),
        name: name.to_string(),
        kind: value_type_kind(descriptor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Annotation, BinaryOp, CatchClause};
    use crate::test_harness::{call, field, local, method_decl, null, param, stmt};

    fn class_a() -> ClassDecl {
        ClassDecl {
            name: "com/example/ClassA".to_string(),
            super_name: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    fn build(method: &MethodDecl) -> ControlFlowGraph {
        let body = method.body.as_deref().expect("body");
        build_cfg(&class_a(), method, body).expect("build cfg")
    }

    fn count_edges(graph: &ControlFlowGraph, kind: EdgeKind) -> usize {
        graph.edges.iter().filter(|edge| edge.kind == kind).count()
    }

    #[test]
    fn straight_line_body_reaches_exit() {
        let method = method_decl(
            "(Ljava/lang/Object;)V",
            vec![param("varOne", &[])],
            Vec::new(),
            vec![
                stmt(StmtKind::Local {
                    name: "varTwo".to_string(),
                    descriptor: "Ljava/lang/Object;".to_string(),
                    annotations: Vec::new(),
                    init: Some(local("varOne")),
                }),
                stmt(StmtKind::Return { value: None }),
            ],
        );

        let graph = build(&method);

        assert_eq!(graph.entry, NodeId(0));
        assert!(
            graph
                .predecessors(graph.exit)
                .any(|edge| matches!(graph.stmt(edge.from), Stmt::Return(None)))
        );
        assert_eq!(0, count_edges(&graph, EdgeKind::Exception));
        assert_eq!(
            vec!["this", "varOne", "varTwo"],
            graph
                .locals
                .iter()
                .map(|local| local.name.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn short_circuit_and_becomes_two_branches() {
        let cond = SourceExpr::And {
            lhs: Box::new(SourceExpr::Binary {
                op: BinaryOp::Ne,
                lhs: Box::new(local("varOne")),
                rhs: Box::new(null()),
            }),
            rhs: Box::new(SourceExpr::Binary {
                op: BinaryOp::Ne,
                lhs: Box::new(local("varTwo")),
                rhs: Box::new(null()),
            }),
        };
        let method = method_decl(
            "(Ljava/lang/Object;Ljava/lang/Object;)V",
            vec![param("varOne", &[]), param("varTwo", &[])],
            Vec::new(),
            vec![stmt(StmtKind::If {
                cond,
                then: vec![stmt(StmtKind::Return { value: None })],
                otherwise: Vec::new(),
            })],
        );

        let graph = build(&method);

        let branches: Vec<NodeId> = graph
            .node_ids()
            .filter(|node| matches!(graph.stmt(*node), Stmt::Branch { .. }))
            .collect();
        assert_eq!(2, branches.len());
        // The first branch's true edge evaluates the second operand.
        let Stmt::Branch { if_true, .. } = graph.stmt(branches[0]) else {
            panic!("expected branch");
        };
        assert_eq!(branches[1], *if_true);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn calls_get_exception_edges_to_handlers() {
        let method = method_decl(
            "(Ljava/lang/Object;)V",
            vec![param("varOne", &[])],
            Vec::new(),
            vec![stmt(StmtKind::Try {
                body: vec![stmt(StmtKind::Expr {
                    expr: call(Some(local("varOne")), "toString", "()Ljava/lang/String;", vec![]),
                })],
                catches: vec![CatchClause {
                    class: "java/lang/RuntimeException".to_string(),
                    name: "error".to_string(),
                    body: vec![stmt(StmtKind::Expr {
                        expr: call(Some(local("error")), "printStackTrace", "()V", vec![]),
                    })],
                }],
            })],
        );

        let graph = build(&method);

        let handler = graph
            .node_ids()
            .find(|node| {
                matches!(
                    graph.stmt(*node),
                    Stmt::Assign {
                        src: Expr::CaughtException { .. },
                        ..
                    }
                )
            })
            .expect("handler node");
        assert!(
            graph
                .predecessors(handler)
                .all(|edge| edge.kind == EdgeKind::Exception)
        );
        assert_eq!(1, graph.predecessor_count(handler));
        // RuntimeException does not catch everything, so the call may still escape.
        let call_node = graph
            .predecessors(handler)
            .next()
            .map(|edge| edge.from)
            .expect("call node");
        assert!(
            graph
                .successors(call_node)
                .any(|edge| edge.to == graph.exceptional_exit)
        );
    }

    #[test]
    fn break_leaves_loop_without_back_edge() {
        let method = method_decl(
            "(Ljava/lang/Object;)V",
            vec![param("varOne", &[])],
            Vec::new(),
            vec![stmt(StmtKind::While {
                cond: SourceExpr::Binary {
                    op: BinaryOp::Ne,
                    lhs: Box::new(local("varOne")),
                    rhs: Box::new(null()),
                },
                body: vec![
                    stmt(StmtKind::Assign {
                        target: local("varOne"),
                        value: field(Some(local("varOne")), "next", "Ljava/lang/Object;"),
                    }),
                    stmt(StmtKind::Break),
                ],
            })],
        );

        let graph = build(&method);

        let header = graph
            .node_ids()
            .find(|node| *node > graph.exceptional_exit && matches!(graph.stmt(*node), Stmt::Nop))
            .expect("loop header");
        assert_eq!(1, graph.predecessor_count(header));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn unknown_local_is_fatal() {
        let method = method_decl(
            "()V",
            Vec::new(),
            Vec::new(),
            vec![stmt(StmtKind::Return {
                value: Some(local("missing")),
            })],
        );

        let err = build_cfg(&class_a(), &method, method.body.as_deref().expect("body"))
            .expect_err("must fail");

        assert!(matches!(err, AnalysisError::UnknownLocal { name, .. } if name == "missing"));
    }

    #[test]
    fn break_outside_loop_is_fatal() {
        let method = method_decl("()V", Vec::new(), Vec::new(), vec![stmt(StmtKind::Break)]);

        let err = build_cfg(&class_a(), &method, method.body.as_deref().expect("body"))
            .expect_err("must fail");

        assert!(matches!(
            err,
            AnalysisError::InvalidControlTransfer { keyword: "break", .. }
        ));
    }

    #[test]
    fn constructor_call_lowers_to_new_and_init() {
        let method = method_decl(
            "()Ljava/lang/Object;",
            Vec::new(),
            vec![Annotation::NonNull],
            vec![stmt(StmtKind::Return {
                value: Some(SourceExpr::New {
                    class: "com/example/ClassB".to_string(),
                    descriptor: "(Ljava/lang/Object;)V".to_string(),
                    args: vec![null()],
                }),
            })],
        );

        let graph = build(&method);

        let init = graph
            .node_ids()
            .find_map(|node| match graph.stmt(node) {
                Stmt::Invoke(invoke) => Some(invoke.clone()),
                _ => None,
            })
            .expect("constructor call");
        assert_eq!(InvokeKind::Special, init.kind);
        assert_eq!("<init>", init.method.name);
        assert_eq!(vec![Operand::Const(Constant::Null)], init.args);
    }
}
