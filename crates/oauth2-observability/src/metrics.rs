use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Duration;

/// Prometheus collectors for backend calls.
///
/// Cloning is cheap; clones share the same collectors and registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub backend_calls_total: IntCounterVec,
    pub backend_call_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let backend_calls_total = IntCounterVec::new(
            Opts::new(
                "oauth2_backend_calls_total",
                "Backend operations by outcome (ok or error code)",
            ),
            &["operation", "outcome"],
        )?;

        let backend_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "oauth2_backend_call_duration_seconds",
                "Backend operation latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(backend_calls_total.clone()))?;
        registry.register(Box::new(backend_call_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            backend_calls_total,
            backend_call_duration_seconds,
        })
    }

    pub fn record(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.backend_calls_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.backend_call_duration_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }
}
