//! Per-method analysis pipeline: lowering, copy propagation, the nullness fixed point and the
//! contract check. Each invocation owns its graph and solver tables, so methods run in parallel.

use std::collections::BTreeMap;

use opentelemetry::{Context as OtelContext, KeyValue};
use rayon::prelude::*;
use tracing::debug;

use crate::builder::build_cfg;
use crate::checker::{ContractChecker, Violation};
use crate::contracts::{Contract, ContractIndex};
use crate::copy_prop::{check_definite_assignment, propagate_copies};
use crate::dataflow::lattice::Fact;
use crate::dataflow::transfer::{NullnessSemantics, value_box_facts};
use crate::dataflow::worklist::{default_visit_limit, solve};
use crate::descriptor::method_shape;
use crate::error::AnalysisError;
use crate::ir::{ControlFlowGraph, ValueBoxId};
use crate::program::{ClassDecl, MethodDecl, Program};
use crate::telemetry::{Telemetry, add_current_span_event};

/// Knobs of one analysis run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct AnalysisOptions {
    /// Only values with `@Nullable` or null-literal provenance count as possibly null.
    pub(crate) only_treat_nullable_as_possibly_null: bool,
    pub(crate) copy_propagation: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            only_treat_nullable_as_possibly_null: false,
            copy_propagation: true,
        }
    }
}

/// Output of analysing one method body.
#[derive(Clone, Debug)]
pub(crate) struct AnalysisResult {
    pub(crate) graph: ControlFlowGraph,
    pub(crate) violations: Vec<Violation>,
    /// Final fact of every value-box on a reached statement.
    pub(crate) facts: BTreeMap<ValueBoxId, Fact>,
}

/// Analysis of one method, keyed by its declaration identity.
#[derive(Clone, Debug)]
pub(crate) struct MethodAnalysis {
    pub(crate) class: String,
    pub(crate) method: String,
    pub(crate) descriptor: String,
    pub(crate) result: AnalysisResult,
}

/// Analyse a single method. Methods without a body yield `None`.
pub(crate) fn analyze_method(
    class: &ClassDecl,
    method: &MethodDecl,
    contracts: &ContractIndex<'_>,
    options: &AnalysisOptions,
) -> Result<Option<AnalysisResult>, AnalysisError> {
    let Some(body) = method.body.as_deref() else {
        debug!(
            class = %class.name,
            method = %method.name,
            "skipping method without body"
        );
        return Ok(None);
    };

    let source = build_cfg(class, method, body)?;
    check_definite_assignment(&source)?;
    let mut graph = source.clone();
    if options.copy_propagation {
        propagate_copies(&mut graph)?;
    }

    let semantics = NullnessSemantics::new(contracts);
    let solution = solve(&graph, &semantics, default_visit_limit(&graph))?;
    debug!(
        method = %graph.method,
        nodes = graph.node_count(),
        visits = solution.visits,
        "nullness fixed point reached"
    );
    add_current_span_event(
        "nullflow.fixed_point",
        &[
            KeyValue::new("nodes", graph.node_count() as i64),
            KeyValue::new("visits", solution.visits as i64),
        ],
    );
    let facts = value_box_facts(&graph, &semantics, &solution)?;
    let reached: Vec<bool> = graph
        .node_ids()
        .map(|node| solution.in_state(node).is_some())
        .collect();

    let return_contract = if method_shape(&method.descriptor)?.return_kind.is_reference() {
        Contract::from_annotations(&method.return_annotations)
    } else {
        Contract::Unspecified
    };
    let violations = ContractChecker::new(&graph, &source, contracts, return_contract, *options)
        .check(&facts, &reached)?;

    Ok(Some(AnalysisResult {
        graph,
        violations,
        facts,
    }))
}

/// Analyse every method with a body, in declaration order.
///
/// The first internal error aborts the run; partial results are discarded.
pub(crate) fn analyze_program(
    program: &Program,
    contracts: &ContractIndex<'_>,
    options: &AnalysisOptions,
    telemetry: Option<&Telemetry>,
) -> Result<Vec<MethodAnalysis>, AnalysisError> {
    let targets: Vec<(&ClassDecl, &MethodDecl)> = program
        .classes
        .iter()
        .flat_map(|class| class.methods.iter().map(move |method| (class, method)))
        .collect();
    let parent = OtelContext::current();

    let analyses: Vec<Option<MethodAnalysis>> = targets
        .par_iter()
        .map(|&(class, method)| {
            let run = || {
                analyze_method(class, method, contracts, options).map(|result| {
                    result.map(|result| MethodAnalysis {
                        class: class.name.clone(),
                        method: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                        result,
                    })
                })
            };
            match telemetry {
                Some(telemetry) => {
                    let attributes = [
                        KeyValue::new("nullflow.class", class.name.clone()),
                        KeyValue::new("nullflow.method", method.name.clone()),
                    ];
                    telemetry.in_span_with_parent("method", &attributes, &parent, run)
                }
                None => run(),
            }
        })
        .collect::<Result<_, AnalysisError>>()?;

    Ok(analyses.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::lattice::Nullness;
    use crate::ir::BoxRole;
    use crate::program::{Annotation, StmtKind};
    use crate::test_harness::{
        assign, call, class_decl, declare, external_method, local, method_decl, new_object, null,
        param, stmt,
    };

    #[test]
    fn bodiless_methods_are_skipped() {
        let external = external_method("methodTwo", "()V", Vec::new(), Vec::new());
        let analysed = method_decl(
            "()V",
            Vec::new(),
            Vec::new(),
            vec![stmt(StmtKind::Return { value: None })],
        );
        let program = Program {
            classes: vec![class_decl("com/example/ClassA", vec![external, analysed])],
        };
        let contracts = ContractIndex::new(&program);

        let analyses = analyze_program(&program, &contracts, &AnalysisOptions::default(), None)
            .expect("analysis");

        assert_eq!(1, analyses.len());
        assert_eq!("com/example/ClassA", analyses[0].class);
        assert!(analyses[0].result.violations.is_empty());
    }

    #[test]
    fn facts_cover_every_box_of_reached_statements() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "(Ljava/lang/Object;)V",
                    vec![param("varOne", &[Annotation::Nullable])],
                    Vec::new(),
                    vec![
                        stmt(declare("varTwo", Some(new_object()))),
                        stmt(declare("varThree", Some(null()))),
                        stmt(StmtKind::Expr {
                            expr: call(
                                Some(local("varTwo")),
                                "methodTwo",
                                "(Ljava/lang/Object;)V",
                                vec![local("varOne")],
                            ),
                        }),
                    ],
                )],
            )],
        };
        let contracts = ContractIndex::new(&program);
        let class = &program.classes[0];

        let result = analyze_method(
            class,
            &class.methods[0],
            &contracts,
            &AnalysisOptions::default(),
        )
        .expect("analysis")
        .expect("body");

        for node in result.graph.node_ids() {
            for index in 0..result.graph.stmt(node).value_boxes().len() {
                assert!(
                    result.facts.contains_key(&ValueBoxId { node, index }),
                    "missing fact for {node:?}#{index}"
                );
            }
        }
        let argument = result
            .graph
            .node_ids()
            .flat_map(|node| {
                let boxes = result.graph.stmt(node).value_boxes();
                boxes
                    .iter()
                    .enumerate()
                    .filter(|(_, value_box)| value_box.role == BoxRole::Argument(0))
                    .map(|(index, _)| ValueBoxId { node, index })
                    .collect::<Vec<_>>()
            })
            .next()
            .expect("argument box");
        assert_eq!(Nullness::Top, result.facts[&argument].nullness);
        assert!(result.facts[&argument].nullable_evidence);
    }

    #[test]
    fn local_assigned_on_one_branch_only_is_fatal() {
        // Object x; if (flag) x = new Object(); x.hashCode();
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "(Z)V",
                    vec![param("flag", &[])],
                    Vec::new(),
                    vec![
                        stmt(declare("varX", None)),
                        stmt(StmtKind::If {
                            cond: local("flag"),
                            then: vec![stmt(assign("varX", new_object()))],
                            otherwise: Vec::new(),
                        }),
                        stmt(StmtKind::Expr {
                            expr: call(Some(local("varX")), "hashCode", "()I", vec![]),
                        }),
                    ],
                )],
            )],
        };
        let contracts = ContractIndex::new(&program);
        let class = &program.classes[0];

        for copy_propagation in [true, false] {
            let options = AnalysisOptions {
                copy_propagation,
                ..AnalysisOptions::default()
            };
            let err = analyze_method(class, &class.methods[0], &contracts, &options)
                .expect_err("partially assigned local must abort");

            assert!(
                matches!(&err, AnalysisError::UndefinedLocal { local, .. } if local == "varX"),
                "{err}"
            );
        }
    }

    #[test]
    fn internal_errors_abort_the_run() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "()V",
                    Vec::new(),
                    Vec::new(),
                    vec![stmt(StmtKind::Return {
                        value: Some(local("varMissing")),
                    })],
                )],
            )],
        };
        let contracts = ContractIndex::new(&program);

        let err = analyze_program(&program, &contracts, &AnalysisOptions::default(), None)
            .err()
            .expect("unknown local must abort");

        assert!(matches!(err, AnalysisError::UnknownLocal { .. }), "{err}");
    }
}
