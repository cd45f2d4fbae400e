//! Built-in routes served next to every registration.

pub mod health;
pub mod metrics;

pub use health::health_handler;
pub use metrics::metrics_handler;

use crate::observability::MetricsExporter;

/// Shared state for the built-in routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub exporter: MetricsExporter,
}
