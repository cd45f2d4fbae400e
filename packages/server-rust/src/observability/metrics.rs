//! Per-registration request counters and latency histograms.
//!
//! The exporter owns its own Prometheus recorder instead of installing a
//! global one, so several servers (or tests) in one process never share
//! series. Collectors are described and checked for name collisions when a
//! transport starts serving; observation after that only touches the
//! recorder.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::{Key, Label, Level, Metadata, Recorder, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use sencillo_core::MetricNames;

/// Latency histogram buckets, in seconds.
pub const LATENCY_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric already registered: {name}")]
    DuplicateRegistration { name: String },
    #[error("failed to build prometheus recorder: {0}")]
    Build(#[from] BuildError),
}

struct ExporterInner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    registered: Mutex<HashSet<String>>,
}

/// Shared metrics registry and Prometheus text renderer.
#[derive(Clone)]
pub struct MetricsExporter {
    inner: Arc<ExporterInner>,
}

impl MetricsExporter {
    /// Creates an empty registry using [`LATENCY_BUCKETS`] for every histogram.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Build` if the bucket ladder is rejected.
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(&LATENCY_BUCKETS)?
            .build_recorder();
        let handle = recorder.handle();
        Ok(Self {
            inner: Arc::new(ExporterInner {
                recorder,
                handle,
                registered: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Collectors for one registration. Nothing is registered yet.
    #[must_use]
    pub fn collectors(&self, names: MetricNames) -> RequestMetrics {
        RequestMetrics {
            exporter: self.clone(),
            names: Arc::new(names),
        }
    }

    /// Registers a collector pair.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::DuplicateRegistration` if either name is taken.
    /// Nothing is registered in that case.
    pub fn register(&self, metrics: &RequestMetrics) -> Result<(), MetricsError> {
        let names = metrics.names();
        let mut registered = self.inner.registered.lock();
        for name in [&names.counter, &names.histogram] {
            if registered.contains(name) {
                return Err(MetricsError::DuplicateRegistration { name: name.clone() });
            }
        }
        registered.insert(names.counter.clone());
        registered.insert(names.histogram.clone());
        drop(registered);

        self.inner.recorder.describe_counter(
            names.counter.clone().into(),
            Some(Unit::Count),
            "Number of requests, partitioned by status code, method and path.".into(),
        );
        self.inner.recorder.describe_histogram(
            names.histogram.clone().into(),
            Some(Unit::Seconds),
            "Request latency, partitioned by status code, method and path.".into(),
        );
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.registered.lock().contains(name)
    }

    /// Renders every series in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }
}

impl fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("registered", &*self.inner.registered.lock())
            .finish_non_exhaustive()
    }
}

/// Counter and histogram for one registration, labeled by code, method and path.
#[derive(Clone, Debug)]
pub struct RequestMetrics {
    exporter: MetricsExporter,
    names: Arc<MetricNames>,
}

impl RequestMetrics {
    #[must_use]
    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    /// Counts one completed request and records its latency.
    pub fn observe(&self, code: u16, method: &str, path: &str, elapsed: Duration) {
        let labels = vec![
            Label::new("code", code.to_string()),
            Label::new("method", method.to_owned()),
            Label::new("path", path.to_owned()),
        ];
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let recorder = &self.exporter.inner.recorder;

        let counter = Key::from_parts(self.names.counter.clone(), labels.clone());
        recorder.register_counter(&counter, &metadata).increment(1);

        let histogram = Key::from_parts(self.names.histogram.clone(), labels);
        recorder
            .register_histogram(&histogram, &metadata)
            .record(elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sencillo_core::TransportKind;

    fn names(path: &str) -> MetricNames {
        MetricNames::new(TransportKind::Http, "/api/v1", path)
    }

    #[test]
    fn register_marks_both_names() {
        let exporter = MetricsExporter::new().unwrap();
        let metrics = exporter.collectors(names("/items"));
        exporter.register(&metrics).unwrap();

        assert!(exporter.is_registered("http_requests_api_v1_items"));
        assert!(exporter.is_registered("http_request_latency_api_v1_items"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let exporter = MetricsExporter::new().unwrap();
        exporter.register(&exporter.collectors(names("/items"))).unwrap();

        let err = exporter
            .register(&exporter.collectors(names("/items")))
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::DuplicateRegistration { ref name } if name == "http_requests_api_v1_items"
        ));
    }

    #[test]
    fn observation_renders_counter_and_histogram() {
        let exporter = MetricsExporter::new().unwrap();
        let metrics = exporter.collectors(names("/items"));
        exporter.register(&metrics).unwrap();

        metrics.observe(200, "GET", "/api/v1/items", Duration::from_millis(20));
        metrics.observe(404, "GET", "/api/v1/items", Duration::from_millis(3));

        let text = exporter.render();
        assert!(text.contains("http_requests_api_v1_items"), "{text}");
        assert!(text.contains("code=\"404\""), "{text}");
        assert!(text.contains("le=\"0.05\""), "{text}");
        let count_line = text
            .lines()
            .find(|l| {
                l.starts_with("http_request_latency_api_v1_items_count") && l.contains("code=\"200\"")
            })
            .unwrap();
        assert!(count_line.ends_with(" 1"), "{count_line}");
    }

    #[test]
    fn exporters_do_not_share_series() {
        let first = MetricsExporter::new().unwrap();
        let second = MetricsExporter::new().unwrap();
        let metrics = first.collectors(names("/isolated"));
        metrics.observe(200, "GET", "/api/v1/isolated", Duration::from_millis(1));

        assert!(first.render().contains("http_requests_api_v1_isolated"));
        assert!(!second.render().contains("http_requests_api_v1_isolated"));
    }
}
