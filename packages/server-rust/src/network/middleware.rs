//! HTTP middleware.
//!
//! Server-wide layers (tracing, drain rejection) wrap the whole router.
//! Per-registration layers (code stats, request identity, timeout) wrap one
//! nested sub-router, so a timed-out request is still counted. Ordering
//! follows the outer-to-inner convention: the first layer listed processes
//! the request first and the response last.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::{OriginalUri, Request, State};
use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service, ServiceBuilder};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId as HeaderRequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use sencillo_core::{RequestId, REQUEST_ID_HEADER};

use crate::lifecycle::ShutdownController;
use crate::observability::RequestMetrics;

// ---------------------------------------------------------------------------
// Request identity
// ---------------------------------------------------------------------------

/// Generates a fresh sortable identifier for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<HeaderRequestId> {
        HeaderValue::from_str(&RequestId::generate().to_string())
            .ok()
            .map(HeaderRequestId::new)
    }
}

type RequestIdLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUlid>, tower::layer::util::Identity>,
>;

/// Request-ID layers for one registration.
///
/// 1. `SetRequestId` -- assigns an identifier only when `x-request-id` is absent
/// 2. `PropagateRequestId` -- copies `x-request-id` onto the response
#[must_use]
pub fn request_id_layers() -> RequestIdLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUlid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

// ---------------------------------------------------------------------------
// Server-wide layers
// ---------------------------------------------------------------------------

type HttpLayers = tower::layer::util::Stack<
    TraceLayer<
        tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    >,
    tower::layer::util::Identity,
>;

/// Layers applied to the whole router.
///
/// 1. `Tracing` -- one span per request with method, URI and status
#[must_use]
pub fn build_http_layers() -> HttpLayers {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .into_inner()
}

/// Answers 408 once `request_timeout` elapses.
///
/// Sits inside `CodeStatsLayer` so the 408 is observed like any other
/// response.
#[must_use]
pub fn request_timeout_layer(request_timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout)
}

/// Rejects new requests with 503 once the server is draining and tracks
/// accepted ones until their response is produced.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_guard) = shutdown.try_admit() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    };
    next.run(request).await
}

// ---------------------------------------------------------------------------
// CodeStatsLayer
// ---------------------------------------------------------------------------

/// Records every response of one registration in its counter and histogram.
#[derive(Debug, Clone)]
pub struct CodeStatsLayer {
    metrics: RequestMetrics,
}

impl CodeStatsLayer {
    #[must_use]
    pub fn new(metrics: RequestMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for CodeStatsLayer {
    type Service = CodeStatsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CodeStatsService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// CodeStatsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CodeStatsService<S> {
    inner: S,
    metrics: RequestMetrics,
}

impl<S, B, ResBody> Service<axum::http::Request<B>> for CodeStatsService<S>
where
    S: Service<axum::http::Request<B>, Response = axum::http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<B>) -> Self::Future {
        let method = request.method().to_string();
        // Nested routers see a stripped URI; label with the full path.
        let path = request
            .extensions()
            .get::<OriginalUri>()
            .map_or_else(|| request.uri().path().to_owned(), |uri| uri.path().to_owned());
        let metrics = self.metrics.clone();
        let start = Instant::now();

        let fut = self.inner.call(request);

        Box::pin(async move {
            let result = fut.await;
            if let Ok(response) = &result {
                metrics.observe(response.status().as_u16(), &method, &path, start.elapsed());
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use sencillo_core::{MetricNames, TransportKind};
    use tower::ServiceExt;

    use crate::observability::MetricsExporter;

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn request_id_generated_when_absent() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(request_id_layers());

        let response = app.oneshot(get_request("/")).await.unwrap();
        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(id.parse::<RequestId>().is_ok(), "{id}");
    }

    #[tokio::test]
    async fn request_id_kept_when_present() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(request_id_layers());

        let request = axum::http::Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, "caller-chosen")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-chosen");
    }

    #[tokio::test]
    async fn draining_rejects_new_requests() {
        let shutdown = Arc::new(ShutdownController::new());
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&shutdown),
                track_in_flight,
            ));

        let response = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        shutdown.begin_drain();
        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn in_flight_guard_released_after_response() {
        let shutdown = Arc::new(ShutdownController::new());
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&shutdown),
                track_in_flight,
            ));

        app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn code_stats_records_status_method_and_full_path() {
        let exporter = MetricsExporter::new().unwrap();
        let metrics =
            exporter.collectors(MetricNames::new(TransportKind::Http, "/api", "/missing"));
        let nested = Router::new()
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .layer(CodeStatsLayer::new(metrics));
        let app = Router::new().nest("/api", nested);

        let response = app.oneshot(get_request("/api/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let text = exporter.render();
        assert!(text.contains("http_requests_api_missing"), "{text}");
        assert!(text.contains("code=\"404\""), "{text}");
        assert!(text.contains("method=\"GET\""), "{text}");
        assert!(text.contains("path=\"/api/missing\""), "{text}");
    }

    #[tokio::test]
    async fn slow_requests_time_out() {
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(request_timeout_layer(Duration::from_millis(20)));

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn timed_out_requests_are_counted() {
        let exporter = MetricsExporter::new().unwrap();
        let metrics = exporter.collectors(MetricNames::new(TransportKind::Http, "/api", "/slow"));
        exporter.register(&metrics).unwrap();
        let nested = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(request_timeout_layer(Duration::from_millis(20)))
            .layer(CodeStatsLayer::new(metrics));
        let app = Router::new().nest("/api", nested);

        let response = app.oneshot(get_request("/api/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let text = exporter.render();
        assert!(text.contains("code=\"408\""), "{text}");
        assert!(text.contains("path=\"/api/slow\""), "{text}");
    }
}
