use std::collections::BTreeSet;

use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::Result as SarifResult;

use crate::checker::{Certainty, Violation, ViolationKind};
use crate::engine::AnalysisContext;
use crate::rules::{Rule, RuleMetadata, method_location_with_span, result_message};

/// Rule that reports values flowing into `@NonNull` contracts while they may be null.
#[derive(Default)]
pub(crate) struct NullnessContractRule;

crate::register_rule!(NullnessContractRule);

impl Rule for NullnessContractRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULLNESS_CONTRACT",
            name: "Nullness contract violations",
            description: "Null or possibly null values passed, assigned, returned or dereferenced against @NonNull contracts",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for analysis in context.analyses() {
            if analysis.result.violations.is_empty() {
                continue;
            }
            let artifact_uri = context
                .class(&analysis.class)
                .and_then(|class| class.source_file.as_deref());
            let attributes = [
                KeyValue::new("nullflow.class", analysis.class.clone()),
                KeyValue::new("nullflow.method", analysis.method.clone()),
            ];
            let method_results = context.with_span("method", &attributes, || {
                analysis
                    .result
                    .violations
                    .iter()
                    .map(|violation| {
                        let location = method_location_with_span(
                            &analysis.class,
                            &analysis.method,
                            &analysis.descriptor,
                            artifact_uri,
                            violation.span,
                        );
                        SarifResult::builder()
                            .message(result_message(violation_message(violation)))
                            .locations(vec![location])
                            .build()
                    })
                    .collect::<Vec<_>>()
            });
            results.extend(method_results);
        }
        Ok(deduplicate_results(results))
    }
}

fn violation_message(violation: &Violation) -> String {
    let certainty = match violation.certainty {
        Certainty::Definite => "Definitely",
        Certainty::Possible => "Possibly",
    };
    let expr = &violation.offending_expr;
    let target = &violation.target;
    match violation.kind {
        ViolationKind::NullArgumentForNonNullParameter => {
            format!("{certainty} null `{expr}` passed to @NonNull {target}")
        }
        ViolationKind::NullAssignmentToNonNullVariable => {
            format!("{certainty} null `{expr}` assigned to @NonNull {target}")
        }
        ViolationKind::NullReturnInNonNullMethod => {
            format!("{certainty} null `{expr}` returned from @NonNull {target}")
        }
        ViolationKind::NullableDereference => {
            format!("{certainty} null `{expr}` dereferenced by {target}")
        }
    }
}

fn deduplicate_results(results: Vec<SarifResult>) -> Vec<SarifResult> {
    let mut seen = BTreeSet::new();
    let mut deduped = Vec::with_capacity(results.len());
    for result in results {
        if seen.insert(result_dedup_key(&result)) {
            deduped.push(result);
        }
    }
    deduped
}

fn result_dedup_key(result: &SarifResult) -> (String, String, i64, i64) {
    let message = result.message.text.clone().unwrap_or_default();
    let Some(location) = result
        .locations
        .as_ref()
        .and_then(|locations| locations.first())
    else {
        return (message, String::new(), 0, 0);
    };
    let logical = location
        .logical_locations
        .as_ref()
        .and_then(|logicals| logicals.first())
        .and_then(|logical| logical.name.clone())
        .unwrap_or_default();
    let region = location
        .physical_location
        .as_ref()
        .and_then(|physical| physical.region.as_ref());
    let line = region.and_then(|region| region.start_line).unwrap_or(0);
    let column = region.and_then(|region| region.start_column).unwrap_or(0);
    (message, logical, line, column)
}
