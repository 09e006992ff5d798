use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// How a `Serve` call ended, as recorded in `handler_plugin_calls_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Handled,
    NotHandled,
    Error,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Handled => "handled",
            CallOutcome::NotHandled => "not_handled",
            CallOutcome::Error => "error",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    pub calls_total: IntCounterVec,
    pub call_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let calls_total = IntCounterVec::new(
            Opts::new(
                "handler_plugin_calls_total",
                "Total number of Serve calls per plugin and outcome",
            ),
            &["plugin", "outcome"],
        )?;
        let call_duration = HistogramVec::new(
            HistogramOpts::new(
                "handler_plugin_call_duration_seconds",
                "Serve call round-trip duration in seconds",
            ),
            &["plugin"],
        )?;

        registry.register(Box::new(calls_total.clone()))?;
        registry.register(Box::new(call_duration.clone()))?;

        Ok(Self {
            registry,
            calls_total,
            call_duration,
        })
    }

    pub fn record_call(&self, plugin: &str, outcome: CallOutcome, elapsed: Duration) {
        self.calls_total
            .with_label_values(&[plugin, outcome.as_str()])
            .inc();
        self.call_duration
            .with_label_values(&[plugin])
            .observe(elapsed.as_secs_f64());
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
