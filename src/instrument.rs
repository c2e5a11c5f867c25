//! Runtime null-check guard planning.
//!
//! The plan lists where an instrumenter has to insert a null check: on entry of every method
//! with a `@NonNull` reference parameter (the dataflow trusts that contract), and at every value
//! flagged by the contract checker.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::checker::{Certainty, ViolationKind};
use crate::contracts::{Contract, MethodContract};
use crate::descriptor::method_shape;
use crate::engine::AnalysisContext;

/// Where a guard is inserted and what it protects.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum GuardKind {
    ParameterEntry,
    Argument,
    Assignment,
    Return,
    Dereference,
}

impl From<ViolationKind> for GuardKind {
    fn from(kind: ViolationKind) -> Self {
        match kind {
            ViolationKind::NullArgumentForNonNullParameter => GuardKind::Argument,
            ViolationKind::NullAssignmentToNonNullVariable => GuardKind::Assignment,
            ViolationKind::NullReturnInNonNullMethod => GuardKind::Return,
            ViolationKind::NullableDereference => GuardKind::Dereference,
        }
    }
}

/// One runtime null check to insert.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct RuntimeGuard {
    pub(crate) class: String,
    pub(crate) method: String,
    pub(crate) descriptor: String,
    pub(crate) kind: GuardKind,
    /// Statement the guard precedes; absent for entry guards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) node: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) parameter: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) certainty: Option<Certainty>,
    /// Source rendering of the checked value.
    pub(crate) value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) line: Option<u32>,
}

/// Plan guards for every analysed method, in declaration order.
pub(crate) fn plan_guards(context: &AnalysisContext) -> Result<Vec<RuntimeGuard>> {
    let mut guards = Vec::new();
    for analysis in context.analyses() {
        let Some(method) = context
            .class(&analysis.class)
            .and_then(|class| class.find_method(&analysis.method, &analysis.descriptor))
        else {
            continue;
        };
        let shape = method_shape(&method.descriptor)
            .with_context(|| format!("plan guards for {}.{}", analysis.class, analysis.method))?;
        let contract = MethodContract::of(method);
        for (index, param) in method.params.iter().enumerate() {
            let is_reference = shape
                .parameters
                .get(index)
                .is_some_and(|kind| kind.is_reference());
            if !is_reference || contract.parameter(index) != Contract::NonNull {
                continue;
            }
            guards.push(RuntimeGuard {
                class: analysis.class.clone(),
                method: analysis.method.clone(),
                descriptor: analysis.descriptor.clone(),
                kind: GuardKind::ParameterEntry,
                node: None,
                parameter: Some(index),
                certainty: None,
                value: param.name.clone(),
                line: method.span.map(|span| span.start_line),
            });
        }
        for violation in &analysis.result.violations {
            guards.push(RuntimeGuard {
                class: analysis.class.clone(),
                method: analysis.method.clone(),
                descriptor: analysis.descriptor.clone(),
                kind: violation.kind.into(),
                node: Some(violation.value_box.node.0),
                parameter: None,
                certainty: Some(violation.certainty),
                value: violation.offending_expr.clone(),
                line: violation.span.map(|span| span.start_line),
            });
        }
    }
    debug!(guards = guards.len(), "runtime guards planned");
    Ok(guards)
}

pub(crate) fn write_guards(writer: &mut dyn Write, guards: &[RuntimeGuard]) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, guards).context("failed to serialize guards")?;
    writer.write_all(b"\n").context("failed to write guards")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisOptions;
    use crate::program::{Annotation, Program, StmtKind};
    use crate::test_harness::{call, class_decl, local, method_decl, param, stmt, stmt_at};

    fn context(program: Program) -> AnalysisContext {
        AnalysisContext::new(program, AnalysisOptions::default(), None).expect("context")
    }

    #[test]
    fn non_null_reference_parameters_get_entry_guards() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "(Ljava/lang/Object;ILjava/lang/Object;)V",
                    vec![
                        param("varOne", &[Annotation::NonNull]),
                        param("varTwo", &[]),
                        param("varThree", &[Annotation::Nullable]),
                    ],
                    Vec::new(),
                    vec![stmt(StmtKind::Return { value: None })],
                )],
            )],
        };

        let guards = plan_guards(&context(program)).expect("guards");

        assert_eq!(1, guards.len());
        assert_eq!(GuardKind::ParameterEntry, guards[0].kind);
        assert_eq!(Some(0), guards[0].parameter);
        assert_eq!("varOne", guards[0].value);
    }

    #[test]
    fn violations_become_guards_at_their_statement() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "(Ljava/lang/Object;)V",
                    vec![param("varOne", &[Annotation::Nullable])],
                    Vec::new(),
                    vec![stmt_at(
                        9,
                        StmtKind::Expr {
                            expr: call(Some(local("varOne")), "methodTwo", "()V", vec![]),
                        },
                    )],
                )],
            )],
        };
        let context = context(program);

        let guards = plan_guards(&context).expect("guards");

        let violation = &context.analyses()[0].result.violations[0];
        assert_eq!(
            vec![RuntimeGuard {
                class: "com/example/ClassA".to_string(),
                method: "methodOne".to_string(),
                descriptor: "(Ljava/lang/Object;)V".to_string(),
                kind: GuardKind::Dereference,
                node: Some(violation.value_box.node.0),
                parameter: None,
                certainty: Some(Certainty::Possible),
                value: "varOne".to_string(),
                line: Some(9),
            }],
            guards
        );
    }

    #[test]
    fn guards_serialize_without_empty_fields() {
        let guard = RuntimeGuard {
            class: "com/example/ClassA".to_string(),
            method: "methodOne".to_string(),
            descriptor: "(Ljava/lang/Object;)V".to_string(),
            kind: GuardKind::ParameterEntry,
            node: None,
            parameter: Some(0),
            certainty: None,
            value: "varOne".to_string(),
            line: None,
        };
        let mut buffer = Vec::new();

        write_guards(&mut buffer, &[guard]).expect("write");

        let value: serde_json::Value = serde_json::from_slice(&buffer).expect("json");
        assert_eq!("parameter_entry", value[0]["kind"]);
        assert_eq!(0, value[0]["parameter"]);
        assert!(value[0].get("node").is_none());
        assert!(value[0].get("certainty").is_none());
    }
}
