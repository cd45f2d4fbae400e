use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::AppState;

/// Prometheus text exposition of every registered collector.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.exporter.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::to_bytes;
    use sencillo_core::{MetricNames, TransportKind};

    use crate::observability::MetricsExporter;

    #[tokio::test]
    async fn metrics_handler_renders_exporter() {
        let exporter = MetricsExporter::new().unwrap();
        let metrics = exporter.collectors(MetricNames::new(TransportKind::Http, "/a", "/b"));
        metrics.observe(200, "GET", "/a/b", Duration::from_millis(5));

        let response = metrics_handler(State(AppState { exporter }))
            .await
            .into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("http_requests_a_b"), "{text}");
    }
}
