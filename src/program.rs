//! Normalized front-end input.
//!
//! An external normalizer resolves symbols, desugars for-each/varargs/autoboxing/generics and
//! hands over one JSON document per analysis run. Nothing here knows about control flow yet;
//! lowering into the IR happens in [`crate::builder`].

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root of the normalized input document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct Program {
    #[serde(default)]
    pub(crate) classes: Vec<ClassDecl>,
}

/// Class declaration with its members.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct ClassDecl {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) super_name: Option<String>,
    #[serde(default)]
    pub(crate) interfaces: Vec<String>,
    #[serde(default)]
    pub(crate) fields: Vec<FieldDecl>,
    #[serde(default)]
    pub(crate) methods: Vec<MethodDecl>,
    #[serde(default)]
    pub(crate) source_file: Option<String>,
}

/// Field declaration. `descriptor` is a JVM field descriptor.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct FieldDecl {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) annotations: Vec<Annotation>,
}

/// Method declaration; methods without a body only contribute contracts.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct MethodDecl {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) params: Vec<ParamDecl>,
    #[serde(default)]
    pub(crate) return_annotations: Vec<Annotation>,
    #[serde(default)]
    pub(crate) body: Option<Vec<SourceStmt>>,
    #[serde(default)]
    pub(crate) span: Option<SourceSpan>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct ParamDecl {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) annotations: Vec<Annotation>,
}

/// Nullness annotation as attached by the front-end.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub(crate) enum Annotation {
    NonNull,
    Nullable,
}

/// Line/column range in the original source, 1-based.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub(crate) struct SourceSpan {
    pub(crate) start_line: u32,
    #[serde(default)]
    pub(crate) start_column: u32,
    #[serde(default)]
    pub(crate) end_line: u32,
    #[serde(default)]
    pub(crate) end_column: u32,
}

impl SourceSpan {
    pub(crate) fn line(start_line: u32) -> Self {
        Self {
            start_line,
            start_column: 0,
            end_line: start_line,
            end_column: 0,
        }
    }
}

/// Statement of a structured method body.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct SourceStmt {
    #[serde(default)]
    pub(crate) span: Option<SourceSpan>,
    #[serde(flatten)]
    pub(crate) kind: StmtKind,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StmtKind {
    Local {
        name: String,
        descriptor: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
        #[serde(default)]
        init: Option<SourceExpr>,
    },
    Assign {
        target: SourceExpr,
        value: SourceExpr,
    },
    Expr {
        expr: SourceExpr,
    },
    Block {
        body: Vec<SourceStmt>,
    },
    If {
        cond: SourceExpr,
        then: Vec<SourceStmt>,
        #[serde(default, rename = "else")]
        otherwise: Vec<SourceStmt>,
    },
    While {
        cond: SourceExpr,
        body: Vec<SourceStmt>,
    },
    DoWhile {
        body: Vec<SourceStmt>,
        cond: SourceExpr,
    },
    Try {
        body: Vec<SourceStmt>,
        #[serde(default)]
        catches: Vec<CatchClause>,
    },
    Return {
        #[serde(default)]
        value: Option<SourceExpr>,
    },
    Throw {
        value: SourceExpr,
    },
    Break,
    Continue,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct CatchClause {
    pub(crate) class: String,
    pub(crate) name: String,
    pub(crate) body: Vec<SourceStmt>,
}

/// Expression of a structured method body.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum SourceExpr {
    Null,
    Int {
        value: i64,
    },
    Bool {
        value: bool,
    },
    Str {
        value: String,
    },
    Class {
        name: String,
    },
    This,
    Local {
        name: String,
    },
    Field {
        #[serde(default)]
        base: Option<Box<SourceExpr>>,
        owner: String,
        name: String,
        descriptor: String,
    },
    Call {
        #[serde(default)]
        base: Option<Box<SourceExpr>>,
        owner: String,
        name: String,
        descriptor: String,
        #[serde(default)]
        args: Vec<SourceExpr>,
    },
    New {
        class: String,
        #[serde(default = "default_constructor_descriptor")]
        descriptor: String,
        #[serde(default)]
        args: Vec<SourceExpr>,
    },
    NewArray {
        descriptor: String,
        length: Box<SourceExpr>,
    },
    Index {
        base: Box<SourceExpr>,
        index: Box<SourceExpr>,
    },
    Cast {
        descriptor: String,
        value: Box<SourceExpr>,
    },
    InstanceOf {
        class: String,
        value: Box<SourceExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<SourceExpr>,
        rhs: Box<SourceExpr>,
    },
    And {
        lhs: Box<SourceExpr>,
        rhs: Box<SourceExpr>,
    },
    Or {
        lhs: Box<SourceExpr>,
        rhs: Box<SourceExpr>,
    },
    Not {
        value: Box<SourceExpr>,
    },
    Conditional {
        cond: Box<SourceExpr>,
        then: Box<SourceExpr>,
        #[serde(rename = "else")]
        otherwise: Box<SourceExpr>,
    },
}

fn default_constructor_descriptor() -> String {
    "()V".to_string()
}

/// Non-short-circuit binary operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

impl SourceExpr {
    /// Whether evaluating the expression yields a boolean that should be lowered to branches.
    pub(crate) fn is_condition(&self) -> bool {
        match self {
            SourceExpr::And { .. }
            | SourceExpr::Or { .. }
            | SourceExpr::Not { .. }
            | SourceExpr::InstanceOf { .. } => true,
            SourceExpr::Binary { op, .. } => op.is_comparison(),
            _ => false,
        }
    }
}

impl ClassDecl {
    pub(crate) fn find_method(&self, name: &str, descriptor: &str) -> Option<&MethodDecl> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub(crate) fn find_field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Load a program from a JSON file, reporting the JSON path of malformed input.
pub(crate) fn load_program(path: &Path) -> Result<Program> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_program(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub(crate) fn parse_program(text: &str) -> Result<Program> {
    let deserializer = &mut serde_json::Deserializer::from_str(text);
    let program = serde_path_to_error::deserialize(deserializer)
        .map_err(|err| anyhow::anyhow!("{} at `{}`", err.inner(), err.path()))?;
    Ok(program)
}
