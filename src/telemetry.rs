use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "nullflow";
const DEFAULT_LOG_FILTER: &str = "nullflow=info,warn";

/// OpenTelemetry tracing handle, enabled by `--otel`.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Export spans to an OTLP/HTTP collector.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    /// Run a closure inside a child of `parent_cx`.
    ///
    /// Rayon workers do not inherit the caller's active context, so method spans are parented
    /// explicitly.
    pub(crate) fn in_span_with_parent<T, F>(
        &self,
        name: &str,
        attributes: &[KeyValue],
        parent_cx: &OtelContext,
        f: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        let mut span = self.tracer.start_with_context(name.to_string(), parent_cx);
        for attribute in attributes {
            span.set_attribute(attribute.clone());
        }
        let cx = parent_cx.with_span(span);
        let _guard = cx.attach();
        f()
    }

    /// Flush pending spans.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to shutdown tracer provider: {err}"))
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder().with_service_name(SERVICE_NAME).build();
        // The batch processor exports from its own thread; ending a span on a rayon worker is
        // a channel send.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A second initialisation (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Attach an event to the active span; no-op outside a recorded span.
pub(crate) fn add_current_span_event(name: &str, attributes: &[KeyValue]) {
    let cx = OtelContext::current();
    let span = cx.span();
    if !span.span_context().is_valid() {
        return;
    }
    span.add_event(name.to_string(), attributes.to_vec());
}

pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span = cx.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return None;
    }
    Some(span_context.trace_id().to_string())
}

/// Span around `f` when telemetry is enabled, plain call otherwise.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}
