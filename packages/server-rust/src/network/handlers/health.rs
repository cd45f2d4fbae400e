//! Liveness endpoint.

use axum::http::StatusCode;

/// Always 200 with an empty body while the process is serving.
///
/// Draining is reported by the drain middleware (503), not here.
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_handler_returns_200() {
        assert_eq!(health_handler().await, StatusCode::OK);
    }
}
