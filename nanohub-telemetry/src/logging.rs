//! ## nanohub-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry attributes**

use opentelemetry::KeyValue;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber, honouring `RUST_LOG` and defaulting to `info`.
    pub fn init() {
        Self::init_with_level("info")
    }

    /// Installs the global subscriber with `level` as the fallback filter.
    ///
    /// Calling this more than once is harmless; only the first subscriber sticks.
    pub fn init_with_level(level: &str) {
        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init();
    }

    /// Records a nanoapp lifecycle transition (load, unload, start failure).
    #[inline]
    pub fn log_lifecycle(kind: &str, attributes: &[KeyValue]) {
        let span = tracing::info_span!("nanoapp_lifecycle", kind = kind, otel.kind = "INTERNAL");
        let _entered = span.enter();
        let rendered: Vec<String> = attributes
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect();
        tracing::info!(attributes = ?rendered, "Nanoapp lifecycle event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn lifecycle_event_is_logged() {
        EventLogger::log_lifecycle(
            "load",
            &[
                KeyValue::new("app_id", "0x0123"),
                KeyValue::new("instance_id", 1i64),
            ],
        );
        assert!(logs_contain("Nanoapp lifecycle event"));
        assert!(logs_contain("instance_id=1"));
    }
}
