use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor, Result as SarifResult};

use crate::analysis::{AnalysisOptions, MethodAnalysis, analyze_program};
use crate::contracts::ContractIndex;
use crate::program::{ClassDecl, Program};
use crate::rules::{Rule, RuleMetadata, all_rules};
use crate::telemetry::{Telemetry, with_span};

/// Inputs shared by analysis rules.
pub(crate) struct AnalysisContext {
    program: Program,
    analyses: Vec<MethodAnalysis>,
    telemetry: Option<Arc<Telemetry>>,
}

/// Timing breakdown for context construction.
pub(crate) struct ContextTimings {
    pub(crate) analysis_duration_ms: u128,
}

/// Analysis engine that executes registered rules.
pub(crate) struct Engine {
    rules: Vec<Box<dyn Rule + Sync>>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        let mut rules = all_rules();
        rules.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        Self { rules }
    }

    pub(crate) fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let mut rules = Vec::new();
        let mut results = Vec::new();

        for rule in &self.rules {
            let metadata = rule.metadata();
            rules.push(rule_descriptor(&metadata));
            let rule_span_attributes = [KeyValue::new("nullflow.rule_id", metadata.id)];
            let mut rule_results = context.with_span(
                &format!("rule:{}", metadata.id),
                &rule_span_attributes,
                || rule.run(context),
            )?;
            for result in &mut rule_results {
                if result.rule_id.is_none() {
                    result.rule_id = Some(metadata.id.to_string());
                }
            }
            results.extend(rule_results);
        }

        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("").to_string();
            let right_msg = right.message.text.as_deref().unwrap_or("").to_string();
            left_id.cmp(right_id).then(left_msg.cmp(&right_msg))
        });

        Ok(EngineOutput { rules, results })
    }
}

/// Aggregated SARIF payload from rule execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

impl AnalysisContext {
    /// Run the nullness analysis over every method body of `program`.
    pub(crate) fn new(
        program: Program,
        options: AnalysisOptions,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Result<Self> {
        let (context, _) = Self::with_timings(program, options, telemetry)?;
        Ok(context)
    }

    pub(crate) fn with_timings(
        program: Program,
        options: AnalysisOptions,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Result<(Self, ContextTimings)> {
        let started_at = Instant::now();
        let analyses = with_span(
            telemetry.as_deref(),
            "nullness_analysis",
            &[KeyValue::new("nullflow.phase", "nullness_analysis")],
            || {
                let contracts = ContractIndex::new(&program);
                analyze_program(&program, &contracts, &options, telemetry.as_deref())
            },
        )?;
        let timings = ContextTimings {
            analysis_duration_ms: started_at.elapsed().as_millis(),
        };
        let context = Self {
            program,
            analyses,
            telemetry,
        };
        Ok((context, timings))
    }

    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }

    pub(crate) fn classes(&self) -> &[ClassDecl] {
        &self.program.classes
    }

    pub(crate) fn contracts(&self) -> ContractIndex<'_> {
        ContractIndex::new(&self.program)
    }

    /// Per-method analyses, in declaration order.
    pub(crate) fn analyses(&self) -> &[MethodAnalysis] {
        &self.analyses
    }

    pub(crate) fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.program.classes.iter().find(|class| class.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Annotation, StmtKind};
    use crate::test_harness::{class_decl, method_decl, null, param, run_engine, stmt};

    #[test]
    fn results_are_sorted_by_rule_then_message() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "(I)Ljava/lang/Object;",
                    vec![param("varOne", &[Annotation::NonNull])],
                    vec![Annotation::NonNull],
                    vec![stmt(StmtKind::Return {
                        value: Some(null()),
                    })],
                )],
            )],
        };

        let output = run_engine(program, AnalysisOptions::default()).expect("engine");

        let keys: Vec<(String, String)> = output
            .results
            .iter()
            .map(|result| {
                (
                    result.rule_id.clone().unwrap_or_default(),
                    result.message.text.clone().unwrap_or_default(),
                )
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys);
        assert!(keys.iter().any(|(id, _)| id == "NULLNESS_ANNOTATION"));
        assert!(keys.iter().any(|(id, _)| id == "NULLNESS_CONTRACT"));
    }

    #[test]
    fn rule_descriptors_follow_rule_order() {
        let output = run_engine(Program::default(), AnalysisOptions::default()).expect("engine");

        let ids: Vec<String> = output.rules.iter().map(|rule| rule.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
        assert!(output.results.is_empty());
    }

    #[test]
    fn internal_error_fails_context_construction() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "()V",
                    Vec::new(),
                    Vec::new(),
                    vec![stmt(StmtKind::Break)],
                )],
            )],
        };

        let result = AnalysisContext::new(program, AnalysisOptions::default(), None);

        assert!(result.is_err());
    }
}
