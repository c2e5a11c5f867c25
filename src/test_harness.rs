//! Fixture builders for normalized programs, plus an end-to-end engine runner.

use anyhow::{Context, Result};

use crate::analysis::AnalysisOptions;
use crate::builder::build_cfg;
use crate::engine::{AnalysisContext, Engine, EngineOutput};
use crate::ir::ControlFlowGraph;
use crate::program::{
    Annotation, BinaryOp, ClassDecl, FieldDecl, MethodDecl, ParamDecl, Program, SourceExpr,
    SourceSpan, SourceStmt, StmtKind,
};

pub(crate) const CLASS_A: &str = "com/example/ClassA";
pub(crate) const CLASS_B: &str = "com/example/ClassB";
const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

pub(crate) fn stmt(kind: StmtKind) -> SourceStmt {
    SourceStmt { span: None, kind }
}

pub(crate) fn stmt_at(line: u32, kind: StmtKind) -> SourceStmt {
    SourceStmt {
        span: Some(SourceSpan::line(line)),
        kind,
    }
}

pub(crate) fn local(name: &str) -> SourceExpr {
    SourceExpr::Local {
        name: name.to_string(),
    }
}

pub(crate) fn null() -> SourceExpr {
    SourceExpr::Null
}

pub(crate) fn new_object() -> SourceExpr {
    SourceExpr::New {
        class: "java/lang/Object".to_string(),
        descriptor: "()V".to_string(),
        args: Vec::new(),
    }
}

/// Call of a `ClassB` method; `base == None` makes it static.
pub(crate) fn call(
    base: Option<SourceExpr>,
    name: &str,
    descriptor: &str,
    args: Vec<SourceExpr>,
) -> SourceExpr {
    SourceExpr::Call {
        base: base.map(Box::new),
        owner: CLASS_B.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        args,
    }
}

pub(crate) fn static_call(
    owner: &str,
    name: &str,
    descriptor: &str,
    args: Vec<SourceExpr>,
) -> SourceExpr {
    SourceExpr::Call {
        base: None,
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        args,
    }
}

/// Access to a `ClassA` field; `base == None` makes it static.
pub(crate) fn field(base: Option<SourceExpr>, name: &str, descriptor: &str) -> SourceExpr {
    SourceExpr::Field {
        base: base.map(Box::new),
        owner: CLASS_A.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    }
}

pub(crate) fn ne_null(expr: SourceExpr) -> SourceExpr {
    SourceExpr::Binary {
        op: BinaryOp::Ne,
        lhs: Box::new(expr),
        rhs: Box::new(SourceExpr::Null),
    }
}

pub(crate) fn eq_null(expr: SourceExpr) -> SourceExpr {
    SourceExpr::Binary {
        op: BinaryOp::Eq,
        lhs: Box::new(expr),
        rhs: Box::new(SourceExpr::Null),
    }
}

/// `Object name = init;`
pub(crate) fn declare(name: &str, init: Option<SourceExpr>) -> StmtKind {
    StmtKind::Local {
        name: name.to_string(),
        descriptor: OBJECT_DESCRIPTOR.to_string(),
        annotations: Vec::new(),
        init,
    }
}

pub(crate) fn declare_annotated(
    name: &str,
    annotations: &[Annotation],
    init: SourceExpr,
) -> StmtKind {
    StmtKind::Local {
        name: name.to_string(),
        descriptor: OBJECT_DESCRIPTOR.to_string(),
        annotations: annotations.to_vec(),
        init: Some(init),
    }
}

pub(crate) fn assign(name: &str, value: SourceExpr) -> StmtKind {
    StmtKind::Assign {
        target: local(name),
        value,
    }
}

pub(crate) fn param(name: &str, annotations: &[Annotation]) -> ParamDecl {
    ParamDecl {
        name: name.to_string(),
        annotations: annotations.to_vec(),
    }
}

/// Instance method `methodOne` with a body.
pub(crate) fn method_decl(
    descriptor: &str,
    params: Vec<ParamDecl>,
    return_annotations: Vec<Annotation>,
    body: Vec<SourceStmt>,
) -> MethodDecl {
    MethodDecl {
        name: "methodOne".to_string(),
        descriptor: descriptor.to_string(),
        is_static: false,
        params,
        return_annotations,
        body: Some(body),
        span: None,
    }
}

/// Bodiless method, contributing only its contracts.
pub(crate) fn external_method(
    name: &str,
    descriptor: &str,
    params: Vec<ParamDecl>,
    return_annotations: Vec<Annotation>,
) -> MethodDecl {
    MethodDecl {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: false,
        params,
        return_annotations,
        body: None,
        span: None,
    }
}

pub(crate) fn field_decl(name: &str, descriptor: &str, annotations: &[Annotation]) -> FieldDecl {
    FieldDecl {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: false,
        annotations: annotations.to_vec(),
    }
}

pub(crate) fn class_decl(name: &str, methods: Vec<MethodDecl>) -> ClassDecl {
    ClassDecl {
        name: name.to_string(),
        super_name: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
        source_file: None,
    }
}

/// Wrap a method in `ClassA` and lower it.
pub(crate) fn build_single(method: MethodDecl) -> (Program, ControlFlowGraph) {
    let program = Program {
        classes: vec![class_decl(CLASS_A, vec![method])],
    };
    let class = &program.classes[0];
    let method = &class.methods[0];
    let body = method.body.as_deref().expect("method body");
    let graph = build_cfg(class, method, body).expect("build cfg");
    (program, graph)
}

/// Run every registered rule over `program`.
pub(crate) fn run_engine(program: Program, options: AnalysisOptions) -> Result<EngineOutput> {
    let context = AnalysisContext::new(program, options, None)?;
    Engine::new().analyze(&context).context("run analysis")
}

/// Result messages of one rule, in engine order.
pub(crate) fn messages_of(output: &EngineOutput, rule_id: &str) -> Vec<String> {
    output
        .results
        .iter()
        .filter(|result| result.rule_id.as_deref() == Some(rule_id))
        .filter_map(|result| result.message.text.clone())
        .collect()
}
