use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use serde_sarif::sarif::{Location, Result as SarifResult};

use crate::contracts::Contract;
use crate::descriptor::{TypeKind, method_shape, value_type_kind};
use crate::engine::AnalysisContext;
use crate::program::{Annotation, ClassDecl, MethodDecl, SourceStmt, StmtKind};
use crate::rules::{Rule, RuleMetadata, field_location, method_location_with_span, result_message};

/// Rule that flags nullness annotations which cannot mean anything.
#[derive(Default)]
pub(crate) struct NullnessAnnotationRule;

crate::register_rule!(NullnessAnnotationRule);

impl Rule for NullnessAnnotationRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULLNESS_ANNOTATION",
            name: "Nullness annotation misuse",
            description: "Conflicting nullness annotations or nullness annotations on primitive and void types",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let mut results = Vec::new();
        for class in context.classes() {
            let attributes = [KeyValue::new("nullflow.class", class.name.clone())];
            let class_results =
                context.with_span("class", &attributes, || -> Result<Vec<SarifResult>> {
                    let mut class_results = check_fields(class)?;
                    for method in &class.methods {
                        class_results.extend(check_method(class, method)?);
                    }
                    Ok(class_results)
                })?;
            results.extend(class_results);
        }
        Ok(results)
    }
}

fn check_fields(class: &ClassDecl) -> Result<Vec<SarifResult>> {
    let mut results = Vec::new();
    for field in &class.fields {
        let kind = value_type_kind(&field.descriptor)
            .with_context(|| format!("field {}.{}", class.name, field.name))?;
        let subject = format!("field {}.{}", class.name, field.name);
        let location = || field_location(&class.name, &field.name, class.source_file.as_deref());
        results.extend(check_declaration(&subject, kind, &field.annotations, location));
    }
    Ok(results)
}

fn check_method(class: &ClassDecl, method: &MethodDecl) -> Result<Vec<SarifResult>> {
    let shape = method_shape(&method.descriptor)
        .with_context(|| format!("method {}.{}", class.name, method.name))?;
    let signature = format!("{}.{}{}", class.name, method.name, method.descriptor);
    let location = |span| {
        method_location_with_span(
            &class.name,
            &method.name,
            &method.descriptor,
            class.source_file.as_deref(),
            span,
        )
    };
    let mut results = Vec::new();

    for (index, param) in method.params.iter().enumerate() {
        let kind = shape
            .parameters
            .get(index)
            .copied()
            .unwrap_or(TypeKind::Reference);
        let subject = format!("parameter {index} of {signature}");
        results.extend(check_declaration(&subject, kind, &param.annotations, || {
            location(method.span)
        }));
    }
    let subject = format!("return of {signature}");
    results.extend(check_declaration(
        &subject,
        shape.return_kind,
        &method.return_annotations,
        || location(method.span),
    ));

    if let Some(body) = &method.body {
        let mut locals = Vec::new();
        collect_locals(body, &mut locals);
        for (stmt, name, descriptor, annotations) in locals {
            let kind = value_type_kind(descriptor)
                .with_context(|| format!("local {name} in {signature}"))?;
            let subject = format!("local {name} in {signature}");
            results.extend(check_declaration(&subject, kind, annotations, || {
                location(stmt.span)
            }));
        }
    }
    Ok(results)
}

type LocalDecl<'a> = (&'a SourceStmt, &'a str, &'a str, &'a [Annotation]);

fn collect_locals<'a>(body: &'a [SourceStmt], locals: &mut Vec<LocalDecl<'a>>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Local {
                name,
                descriptor,
                annotations,
                ..
            } => locals.push((stmt, name.as_str(), descriptor.as_str(), annotations.as_slice())),
            StmtKind::Block { body }
            | StmtKind::While { body, .. }
            | StmtKind::DoWhile { body, .. } => collect_locals(body, locals),
            StmtKind::If {
                then, otherwise, ..
            } => {
                collect_locals(then, locals);
                collect_locals(otherwise, locals);
            }
            StmtKind::Try { body, catches } => {
                collect_locals(body, locals);
                for catch in catches {
                    collect_locals(&catch.body, locals);
                }
            }
            StmtKind::Assign { .. }
            | StmtKind::Expr { .. }
            | StmtKind::Return { .. }
            | StmtKind::Throw { .. }
            | StmtKind::Break
            | StmtKind::Continue => {}
        }
    }
}

fn check_declaration(
    subject: &str,
    kind: TypeKind,
    annotations: &[Annotation],
    location: impl Fn() -> Location,
) -> Vec<SarifResult> {
    if annotations.is_empty() {
        return Vec::new();
    }
    let mut messages = Vec::new();
    if Contract::is_conflicting(annotations) {
        messages.push(format!(
            "Nullness annotation: {subject} is both @NonNull and @Nullable"
        ));
    }
    match kind {
        TypeKind::Primitive => messages.push(format!(
            "Nullness annotation: {subject} has a primitive type"
        )),
        TypeKind::Void => messages.push(format!("Nullness annotation: {subject} is void")),
        TypeKind::Reference => {}
    }
    messages
        .into_iter()
        .map(|message| {
            SarifResult::builder()
                .message(result_message(message))
                .locations(vec![location()])
                .build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::analysis::AnalysisOptions;
    use crate::program::{Annotation, Program, StmtKind};
    use crate::test_harness::{
        class_decl, external_method, field_decl, messages_of, method_decl, new_object, param,
        run_engine, stmt,
    };

    const RULE_ID: &str = "NULLNESS_ANNOTATION";

    #[test]
    fn conflicting_parameter_annotations_are_reported() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![external_method(
                    "methodOne",
                    "(Ljava/lang/Object;)V",
                    vec![param("varOne", &[Annotation::NonNull, Annotation::Nullable])],
                    Vec::new(),
                )],
            )],
        };

        let output = run_engine(program, AnalysisOptions::default()).expect("engine");

        assert_eq!(
            vec![
                "Nullness annotation: parameter 0 of com/example/ClassA.methodOne(Ljava/lang/Object;)V is both @NonNull and @Nullable"
                    .to_string()
            ],
            messages_of(&output, RULE_ID)
        );
    }

    #[test]
    fn primitive_and_void_declarations_are_reported() {
        let mut class = class_decl(
            "com/example/ClassA",
            vec![external_method(
                "methodOne",
                "(I)V",
                vec![param("varOne", &[Annotation::NonNull])],
                vec![Annotation::Nullable],
            )],
        );
        class.fields = vec![field_decl("fieldOne", "J", &[Annotation::Nullable])];
        let program = Program {
            classes: vec![class],
        };

        let output = run_engine(program, AnalysisOptions::default()).expect("engine");

        assert_eq!(
            vec![
                "Nullness annotation: field com/example/ClassA.fieldOne has a primitive type"
                    .to_string(),
                "Nullness annotation: parameter 0 of com/example/ClassA.methodOne(I)V has a primitive type"
                    .to_string(),
                "Nullness annotation: return of com/example/ClassA.methodOne(I)V is void"
                    .to_string(),
            ],
            messages_of(&output, RULE_ID)
        );
    }

    #[test]
    fn annotated_primitive_local_is_reported() {
        let program = Program {
            classes: vec![class_decl(
                "com/example/ClassA",
                vec![method_decl(
                    "()V",
                    Vec::new(),
                    Vec::new(),
                    vec![stmt(StmtKind::Block {
                        body: vec![stmt(StmtKind::Local {
                            name: "varOne".to_string(),
                            descriptor: "Z".to_string(),
                            annotations: vec![Annotation::NonNull],
                            init: None,
                        })],
                    })],
                )],
            )],
        };

        let output = run_engine(program, AnalysisOptions::default()).expect("engine");

        assert_eq!(
            vec![
                "Nullness annotation: local varOne in com/example/ClassA.methodOne()V has a primitive type"
                    .to_string()
            ],
            messages_of(&output, RULE_ID)
        );
    }

    #[test]
    fn well_formed_annotations_are_accepted() {
        let mut class = class_decl(
            "com/example/ClassA",
            vec![method_decl(
                "(Ljava/lang/Object;)Ljava/lang/Object;",
                vec![param("varOne", &[Annotation::Nullable])],
                vec![Annotation::NonNull],
                vec![stmt(StmtKind::Return {
                    value: Some(new_object()),
                })],
            )],
        );
        class.fields = vec![field_decl(
            "fieldOne",
            "Ljava/lang/String;",
            &[Annotation::NonNull],
        )];
        let program = Program {
            classes: vec![class],
        };

        let output = run_engine(program, AnalysisOptions::default()).expect("engine");

        assert!(messages_of(&output, RULE_ID).is_empty());
    }
}
