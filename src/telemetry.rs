pub use oauth2_observability::{
    annotate_span_with_trace_ids, encode_prometheus_text, init_telemetry, Metrics,
    TelemetryGuard,
};
