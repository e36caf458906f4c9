//! # nanohub telemetry
//!
//! Logging initialisation and prometheus metrics for the context hub runtime.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
