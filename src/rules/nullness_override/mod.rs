use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::Result as SarifResult;

use crate::contracts::{Contract, MethodContract};
use crate::engine::AnalysisContext;
use crate::program::{ClassDecl, MethodDecl};
use crate::rules::{Rule, RuleMetadata, method_location_with_span, result_message};

/// Rule that checks overrides against the nullness contracts of the methods they override.
#[derive(Default)]
pub(crate) struct NullnessOverrideRule;

crate::register_rule!(NullnessOverrideRule);

impl Rule for NullnessOverrideRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULLNESS_OVERRIDE",
            name: "Nullness override",
            description: "Overrides that weaken a @NonNull return or strengthen a @Nullable parameter",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let contracts = context.contracts();
        let mut results = Vec::new();
        for class in context.classes() {
            let supertypes = contracts.supertypes(class);
            if supertypes.is_empty() {
                continue;
            }
            let attributes = [KeyValue::new("nullflow.class", class.name.clone())];
            let class_results = context.with_span("class", &attributes, || {
                let mut class_results = Vec::new();
                for method in class.methods.iter().filter(|method| can_override(method)) {
                    let Some(base_method) = supertypes
                        .iter()
                        .find_map(|super_class| {
                            super_class.find_method(&method.name, &method.descriptor)
                        })
                    else {
                        continue;
                    };
                    class_results.extend(check_override(class, method, base_method));
                }
                class_results
            });
            results.extend(class_results);
        }
        Ok(results)
    }
}

fn can_override(method: &MethodDecl) -> bool {
    !method.is_static && !method.name.starts_with('<')
}

fn check_override(
    class: &ClassDecl,
    method: &MethodDecl,
    base_method: &MethodDecl,
) -> Vec<SarifResult> {
    let mut results = Vec::new();
    let contract = MethodContract::of(method);
    let base_contract = MethodContract::of(base_method);
    let location = || {
        method_location_with_span(
            &class.name,
            &method.name,
            &method.descriptor,
            class.source_file.as_deref(),
            method.span,
        )
    };

    if base_contract.return_contract == Contract::NonNull
        && contract.return_contract == Contract::Nullable
    {
        let message = result_message(format!(
            "Nullness override: {}.{}{} returns @Nullable but overrides @NonNull",
            class.name, method.name, method.descriptor
        ));
        results.push(
            SarifResult::builder()
                .message(message)
                .locations(vec![location()])
                .build(),
        );
    }
    let count = contract.parameters.len().min(base_contract.parameters.len());
    for index in 0..count {
        if base_contract.parameter(index) == Contract::Nullable
            && contract.parameter(index) == Contract::NonNull
        {
            let message = result_message(format!(
                "Nullness override: {}.{}{} parameter {} is @NonNull but overrides @Nullable",
                class.name, method.name, method.descriptor, index
            ));
            results.push(
                SarifResult::builder()
                    .message(message)
                    .locations(vec![location()])
                    .build(),
            );
        }
    }
    results
}
