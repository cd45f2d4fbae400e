//! HTTP server configuration.

use std::time::Duration;

/// Listener and routing settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Maximum time a single request may take before a 408 is returned.
    pub request_timeout: Duration,
    /// Maximum time to wait for in-flight requests once draining starts.
    pub shutdown_timeout: Duration,
    /// Liveness route, answered with an empty 200.
    pub health_path: String,
    /// Prometheus exposition route.
    pub metrics_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            health_path: "/healthz".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}
