//! Deterministic metric naming for registrations.
//!
//! Every registration (an HTTP route group or a messaging endpoint group)
//! gets its own counter and histogram. Their names are derived from the
//! registration prefix and the first route's path, so the same inputs always
//! yield the same names.
//!
//! Normalization: `{` and `}` are removed, every other character outside
//! `[A-Za-z0-9_]` becomes `_`.

use crate::context::TransportKind;

/// Normalizes one fragment of a metric name.
#[must_use]
pub fn normalize(fragment: &str) -> String {
    fragment
        .chars()
        .filter(|c| !matches!(c, '{' | '}'))
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Unique suffix for a registration's collectors.
#[must_use]
pub fn metric_name(prefix: &str, first_path: &str) -> String {
    format!("{}{}", normalize(prefix), normalize(first_path))
}

/// Counter and histogram names for one registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricNames {
    pub counter: String,
    pub histogram: String,
}

impl MetricNames {
    /// Names for a registration on the given surface.
    ///
    /// ```
    /// use sencillo_core::{MetricNames, TransportKind};
    ///
    /// let names = MetricNames::new(TransportKind::Http, "/api/v1/", "/products/{id}");
    /// assert_eq!(names.counter, "http_requests_api_v1__products_id");
    /// assert_eq!(names.histogram, "http_request_latency_api_v1__products_id");
    /// ```
    #[must_use]
    pub fn new(transport: TransportKind, prefix: &str, first_path: &str) -> Self {
        let name = metric_name(prefix, first_path);
        let (counter, histogram) = match transport {
            TransportKind::Http => ("http_requests", "http_request_latency"),
            TransportKind::Message => ("message_requests", "message_request_latency"),
        };
        // Messaging subjects start with a token, not a separator.
        let sep = if name.starts_with('_') { "" } else { "_" };
        Self {
            counter: format!("{counter}{sep}{name}"),
            histogram: format!("{histogram}{sep}{name}"),
        }
    }
}
