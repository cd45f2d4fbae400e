//! Logging, metrics and tracer hooks shared by every transport.

pub mod logging;
pub mod metrics;
pub mod tracer;

pub use logging::{init_tracing, level_directive, log_failure, Logger, LoggingConfig, LOG_LEVEL_ENV};
pub use metrics::{MetricsError, MetricsExporter, RequestMetrics, LATENCY_BUCKETS};
pub use tracer::TracerProvider;
