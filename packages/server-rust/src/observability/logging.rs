//! Structured logging.
//!
//! `init_tracing` installs the process-wide subscriber once at startup.
//! `Logger` is the handle passed into adapters and handlers: a span that
//! carries contextual fields, so every event emitted through it (or inside
//! `logger.span().in_scope(..)`) is annotated with those fields.

use std::fmt::Display;

use sencillo_core::{is_auth_status, Classified, INTERNAL_ERROR_STATUS};
use tracing::{debug, error, info_span, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the default log level.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Logging setup for a process.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// `error`, `info` or `debug`. Falls back to `LOG_LEVEL`, then `info`.
    pub level: Option<String>,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

/// Maps a configured level name to a filter directive.
///
/// Unknown names fall back to `info`.
#[must_use]
pub fn level_directive(level: Option<&str>) -> &'static str {
    match level.map(str::to_ascii_lowercase).as_deref() {
        Some("error") => "error",
        Some("debug") => "debug",
        _ => "info",
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level comes from the config or
/// `LOG_LEVEL`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let from_env = std::env::var(LOG_LEVEL_ENV).ok();
    let level = level_directive(config.level.as_deref().or(from_env.as_deref()));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Contextual logger.
///
/// Cloning is cheap; `with_request` derives a child carrying the request
/// identifier and path without touching the parent.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Root logger for a named service.
    #[must_use]
    pub fn new(service: &str) -> Self {
        Self {
            span: info_span!("service", name = %service),
        }
    }

    /// Wraps an existing span.
    #[must_use]
    pub fn from_span(span: Span) -> Self {
        Self { span }
    }

    /// Child logger annotated with `request_id` and `path`.
    #[must_use]
    pub fn with_request(&self, request_id: &str, path: &str) -> Self {
        Self {
            span: info_span!(parent: &self.span, "request", request_id = %request_id, path = %path),
        }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn error(&self, message: impl Display) {
        self.span.in_scope(|| tracing::error!("{message}"));
    }

    pub fn warn(&self, message: impl Display) {
        self.span.in_scope(|| tracing::warn!("{message}"));
    }

    pub fn info(&self, message: impl Display) {
        self.span.in_scope(|| tracing::info!("{message}"));
    }

    pub fn debug(&self, message: impl Display) {
        self.span.in_scope(|| tracing::debug!("{message}"));
    }
}

/// Logs a classified handler failure.
///
/// Auth failures (401, 403) are logged at error level, other client errors
/// at debug. Internal errors are logged in full at error level.
pub fn log_failure(logger: &Logger, classified: &Classified<'_>) {
    logger.span.in_scope(|| match classified {
        Classified::Client(client) => {
            let code = client.code();
            let message = client.logged_error();
            if is_auth_status(code) {
                error!(status = code, error = %message, "client error");
            } else {
                debug!(status = code, error = %message, "client error");
            }
        }
        Classified::Internal(err) => {
            error!(status = INTERNAL_ERROR_STATUS, error = %format!("{err:#}"), "internal error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;

    #[test]
    fn level_names_map_to_directives() {
        assert_eq!(level_directive(Some("error")), "error");
        assert_eq!(level_directive(Some("DEBUG")), "debug");
        assert_eq!(level_directive(Some("info")), "info");
        assert_eq!(level_directive(Some("verbose")), "info");
        assert_eq!(level_directive(None), "info");
    }

    #[test]
    fn request_logger_carries_identity_fields() {
        let (logs, _guard) = capture_logs();

        let root = Logger::new("inventory");
        let request = root.with_request("01HZX3J5K6ABCDEFGHJKMNPQRS", "/api/v1/items");
        request.info("handled");

        let out = logs.contents();
        assert!(out.contains("handled"), "{out}");
        assert!(out.contains("request_id=01HZX3J5K6ABCDEFGHJKMNPQRS"), "{out}");
        assert!(out.contains("path=/api/v1/items"), "{out}");
        assert!(out.contains("name=inventory"), "{out}");
    }

    #[test]
    fn parent_logger_is_unchanged_by_child() {
        let (logs, _guard) = capture_logs();

        let root = Logger::new("inventory");
        let _child = root.with_request("abc", "/x");
        root.warn("root only");

        let out = logs.contents();
        assert!(out.contains("root only"), "{out}");
        assert!(!out.contains("request_id"), "{out}");
    }
}
