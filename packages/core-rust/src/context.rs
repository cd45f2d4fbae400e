use std::fmt;
use std::time::{Duration, Instant};

/// Which request/reply surface a unit of work arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Message,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request context created at request entry.
/// Owned by exactly one request; dropped once the reply is written.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request identifier (generated, propagated, or parsed from the subject).
    pub request_id: String,
    /// When the adapter first saw the request.
    pub start_time: Instant,
    pub transport: TransportKind,
    /// HTTP path or messaging subject.
    pub subject_or_path: String,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        transport: TransportKind,
        subject_or_path: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            start_time: Instant::now(),
            transport,
            subject_or_path: subject_or_path.into(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
