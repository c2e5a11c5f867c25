use anyhow::Result;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, Region,
    Result as SarifResult,
};

use crate::engine::AnalysisContext;
use crate::program::SourceSpan;

// Rule modules are generated by build.rs from src/rules/*/mod.rs.
include!(concat!(env!("OUT_DIR"), "/rule_modules.rs"));

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Rule interface for analysis execution.
pub(crate) trait Rule {
    fn metadata(&self) -> RuleMetadata;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

/// Wrapper struct for rule factory functions to enable inventory collection.
pub(crate) struct RuleFactory(pub fn() -> Box<dyn Rule + Sync>);

inventory::collect!(RuleFactory);

/// Macro to register a rule implementation.
///
/// Usage: `register_rule!(RuleName);`
/// This macro creates a factory function and registers it with inventory.
#[macro_export]
macro_rules! register_rule {
    ($rule_type:ty) => {
        inventory::submit! {
            $crate::rules::RuleFactory(|| Box::new(<$rule_type>::default()))
        }
    };
}

/// Returns all registered rules as boxed trait objects.
pub(crate) fn all_rules() -> Vec<Box<dyn Rule + Sync>> {
    inventory::iter::<RuleFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

pub(crate) fn method_location_with_span(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    artifact_uri: Option<&str>,
    span: Option<SourceSpan>,
) -> Location {
    let logical = method_logical_location(class_name, method_name, descriptor);
    let Some(uri) = artifact_uri else {
        return Location::builder().logical_locations(vec![logical]).build();
    };
    let artifact_location = ArtifactLocation::builder().uri(uri.to_string()).build();
    let physical = match span.and_then(region) {
        Some(region) => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .region(region)
            .build(),
        None => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .build(),
    };
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

/// Region of a span; spans without a line carry no region.
fn region(span: SourceSpan) -> Option<Region> {
    if span.start_line == 0 {
        return None;
    }
    let region = if span.start_column > 0 {
        Region::builder()
            .start_line(i64::from(span.start_line))
            .start_column(i64::from(span.start_column))
            .build()
    } else {
        Region::builder()
            .start_line(i64::from(span.start_line))
            .build()
    };
    Some(region)
}

pub(crate) fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn field_location(
    class_name: &str,
    field_name: &str,
    artifact_uri: Option<&str>,
) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{field_name}"))
        .kind("member")
        .build();
    let Some(uri) = artifact_uri else {
        return Location::builder().logical_locations(vec![logical]).build();
    };
    let physical = PhysicalLocation::builder()
        .artifact_location(ArtifactLocation::builder().uri(uri.to_string()).build())
        .build();
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
