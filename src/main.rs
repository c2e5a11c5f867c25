mod analysis;
mod builder;
mod checker;
mod contracts;
mod copy_prop;
mod dataflow;
mod descriptor;
mod engine;
mod error;
mod instrument;
mod ir;
mod program;
mod rules;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, PropertyBag, ReportingDescriptor, Result as SarifResult,
    Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};
use tracing::info;

use crate::analysis::AnalysisOptions;
use crate::engine::{AnalysisContext, Engine};
use crate::instrument::{plan_guards, write_guards};
use crate::program::{Program, load_program};
use crate::telemetry::{Telemetry, current_trace_id, init_logging, with_span};

/// CLI arguments for nullflow execution.
#[derive(Parser, Debug)]
#[command(
    name = "nullflow",
    about = "Flow-sensitive @NonNull/@Nullable contract checking with SARIF output.",
    version
)]
struct Cli {
    /// Normalized program JSON.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// SARIF destination; `-` or absent writes to stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Write the runtime null-check plan as JSON.
    #[arg(long, value_name = "PATH")]
    guards: Option<PathBuf>,
    /// Only values with @Nullable or null-literal provenance are reported as possibly null.
    #[arg(long)]
    only_nullable_as_possibly_null: bool,
    #[arg(long)]
    no_copy_propagation: bool,
    /// OTLP/HTTP collector URL for tracing spans.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

impl Cli {
    fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            only_treat_nullable_as_possibly_null: self.only_nullable_as_possibly_null,
            copy_propagation: !self.no_copy_propagation,
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let telemetry = cli
        .otel
        .clone()
        .map(Telemetry::new)
        .transpose()?
        .map(Arc::new);

    let attributes = [KeyValue::new(
        "nullflow.input",
        cli.input.display().to_string(),
    )];
    let outcome = with_span(telemetry.as_deref(), "nullflow", &attributes, || {
        run_analysis(&cli, telemetry.clone())
    });
    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }
    outcome
}

fn run_analysis(cli: &Cli, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    let started_at = Instant::now();
    let program = load_program(&cli.input)?;
    let artifacts = source_artifacts(&program);
    let class_count = program.classes.len();

    let (context, timings) = AnalysisContext::with_timings(program, cli.options(), telemetry)
        .context("nullness analysis failed")?;
    let output = Engine::new().analyze(&context)?;
    let stats = InvocationStats {
        analysis_duration_ms: timings.analysis_duration_ms,
        class_count,
        method_count: context.analyses().len(),
        trace_id: current_trace_id(),
    };
    info!(
        classes = stats.class_count,
        methods = stats.method_count,
        results = output.results.len(),
        "analysis finished"
    );

    let invocation = build_invocation(&stats);
    let sarif = build_sarif(artifacts, invocation, output.rules, output.results);
    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    writer.flush().context("failed to flush SARIF output")?;

    if let Some(path) = &cli.guards {
        let guards = plan_guards(&context)?;
        let mut writer = BufWriter::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        write_guards(&mut writer, &guards)?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} analysis_ms={} classes={} methods={}",
            started_at.elapsed().as_millis(),
            stats.analysis_duration_ms,
            stats.class_count,
            stats.method_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        ))),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Source files named by the input, one artifact each.
fn source_artifacts(program: &Program) -> Vec<Artifact> {
    let uris: BTreeSet<&str> = program
        .classes
        .iter()
        .filter_map(|class| class.source_file.as_deref())
        .collect();
    uris.into_iter()
        .map(|uri| {
            Artifact::builder()
                .location(ArtifactLocation::builder().uri(uri).build())
                .build()
        })
        .collect()
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    analysis_duration_ms: u128,
    class_count: usize,
    method_count: usize,
    trace_id: Option<String>,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "nullflow.analysis_ms".to_string(),
        json!(stats.analysis_duration_ms),
    );
    properties.insert("nullflow.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "nullflow.method_count".to_string(),
        json!(stats.method_count),
    );
    if let Some(trace_id) = &stats.trace_id {
        properties.insert("nullflow.trace_id".to_string(), json!(trace_id));
    }

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder().name("nullflow").build()
    } else {
        ToolComponent::builder().name("nullflow").rules(rules).build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
