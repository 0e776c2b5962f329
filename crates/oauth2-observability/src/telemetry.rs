use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
    Resource,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Checked in order; the first non-blank value is the OTLP gRPC endpoint.
const OTLP_ENDPOINT_VARS: [&str; 3] = [
    "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "OAUTH2_OTLP_ENDPOINT",
];

fn otlp_endpoint(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    OTLP_ENDPOINT_VARS
        .iter()
        .filter_map(|&name| lookup(name))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Keeps the tracer provider alive; call [`TelemetryGuard::shutdown`] before exit.
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl TelemetryGuard {
    /// Flush and stop the tracer provider.
    pub fn shutdown(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.provider.shutdown()?;
        Ok(())
    }
}

/// Initialize tracing/logging with OpenTelemetry span ids.
///
/// - Always emits structured JSON logs via `tracing_subscriber`, filtered by
///   `RUST_LOG` (default `info`).
/// - Bridges `log` records into `tracing` so `log::info!` etc. are correlated.
/// - Exports spans over OTLP/gRPC when `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT`,
///   `OTEL_EXPORTER_OTLP_ENDPOINT` or `OAUTH2_OTLP_ENDPOINT` is set.
/// - Otherwise installs a local tracer provider so every span still carries
///   trace/span ids that [`annotate_span_with_trace_ids`] can copy into log lines.
pub fn init_telemetry(
    service_name: &str,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Use W3C trace-context for propagation (traceparent/tracestate).
    global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let builder = SdkTracerProvider::builder()
        .with_resource(resource)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)));

    // Prefer OTLP export when configured; otherwise still install a provider to generate IDs.
    let endpoint = otlp_endpoint(|name| std::env::var(name).ok());
    let provider = match &endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()?;
            builder.with_batch_exporter(exporter).build()
        }
        None => builder.build(),
    };
    let tracer = provider.tracer(service_name.to_string());
    global::set_tracer_provider(provider.clone());

    // Export tracing spans to OpenTelemetry.
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    // with_current_span + with_span_list ensures every event includes the active span stack
    // (which we enrich with trace_id/span_id fields).
    let formatting_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(formatting_layer)
        .try_init()?;

    // Ignore errors if a logger was already set (e.g., tests).
    let _ = tracing_log::LogTracer::init();

    match &endpoint {
        Some(endpoint) => tracing::info!(otlp_endpoint = %endpoint, "exporting traces over OTLP"),
        None => tracing::debug!("no OTLP endpoint configured; spans stay local"),
    }

    Ok(TelemetryGuard { provider })
}

/// Record OpenTelemetry trace/span identifiers onto a span.
///
/// The span must declare `trace_id` and `span_id` fields (as `field::Empty`).
pub fn annotate_span_with_trace_ids(span: &Span) {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;
    let cx = span.context();
    let otel_span = cx.span();
    let sc = otel_span.span_context();
    if sc.is_valid() {
        span.record("trace_id", tracing::field::display(sc.trace_id()));
        span.record("span_id", tracing::field::display(sc.span_id()));
    }
}
