//! ## nanohub-telemetry::metrics
//! **Prometheus exporter for the event loop, timer pool, heap and PAL error rates**

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub events_dispatched: IntCounter,
    pub events_dropped: IntCounter,
    pub deferred_callbacks: IntCounter,
    pub timers_fired: IntCounter,
    pub heap_bytes: IntGauge,
    pub pal_errors: IntCounterVec,
    pub dispatch_latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_dispatched = IntCounter::new(
            "nanohub_events_dispatched_total",
            "Events delivered to at least one nanoapp",
        )?;
        let events_dropped = IntCounter::new(
            "nanohub_events_dropped_total",
            "Events released without delivery (queue full, unknown target, unload)",
        )?;
        let deferred_callbacks = IntCounter::new(
            "nanohub_deferred_callbacks_total",
            "System callbacks executed on the event loop",
        )?;
        let timers_fired = IntCounter::new("nanohub_timers_fired_total", "Expired timer requests")?;
        let heap_bytes = IntGauge::new("nanohub_heap_bytes", "Bytes accounted to nanoapps")?;
        let pal_errors = IntCounterVec::new(
            Opts::new("nanohub_pal_errors_total", "Failed PAL completions"),
            &["resource"],
        )?;
        let dispatch_latency = Histogram::with_opts(
            HistogramOpts::new(
                "nanohub_dispatch_latency_ns",
                "Time spent running one event or callback to completion",
            )
            .buckets(vec![1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
        )?;

        registry.register(Box::new(events_dispatched.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(deferred_callbacks.clone()))?;
        registry.register(Box::new(timers_fired.clone()))?;
        registry.register(Box::new(heap_bytes.clone()))?;
        registry.register(Box::new(pal_errors.clone()))?;
        registry.register(Box::new(dispatch_latency.clone()))?;

        Ok(Self {
            registry,
            events_dispatched,
            events_dropped,
            deferred_callbacks,
            timers_fired,
            heap_bytes,
            pal_errors,
            dispatch_latency,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn record_pal_error(&self, resource: &str) {
        self.pal_errors.with_label_values(&[resource]).inc();
    }
}
