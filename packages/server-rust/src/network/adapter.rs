//! HTTP request adapter.
//!
//! Converts a fallible handler (`HttpRequest -> anyhow::Result<Response>`)
//! into an infallible axum handler. Every request gets exactly one response:
//! the handler's own on success, the classified client error body on a
//! caller mistake, or the generic 500 body on anything else. The internal
//! cause of a 500 is logged and never written to the wire.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use sencillo_core::{
    classify, Classified, RequestContext, TransportKind, INTERNAL_ERROR_BODY, REQUEST_ID_HEADER,
};

use crate::observability::{log_failure, Logger};

/// Boxed, sendable future returned by type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Everything a handler receives for one HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    pub request: Request<Body>,
    /// Logger already annotated with `request_id` and `path`.
    pub logger: Logger,
    pub context: RequestContext,
}

/// A fallible HTTP handler.
///
/// Implemented for every `Fn(HttpRequest) -> impl Future<Output = anyhow::Result<Response>>`.
pub trait HttpHandler: Send + Sync + 'static {
    fn call(&self, request: HttpRequest) -> BoxFuture<anyhow::Result<Response>>;
}

impl<F, Fut> HttpHandler for F
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    fn call(&self, request: HttpRequest) -> BoxFuture<anyhow::Result<Response>> {
        Box::pin(self(request))
    }
}

/// Binds a shared context value to a handler that needs it.
///
/// The context is cloned into every call, so it is usually an `Arc` or a
/// cheap handle.
pub fn handle_with_context<T, F, Fut>(
    handler: F,
    context: T,
) -> impl Fn(HttpRequest) -> Fut + Clone + Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
    F: Fn(HttpRequest, T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    move |request| handler(request, context.clone())
}

/// Adapter wrapping one handler.
#[derive(Clone)]
pub struct ErrHandler {
    handler: Arc<dyn HttpHandler>,
    logger: Logger,
}

impl ErrHandler {
    pub fn new(handler: impl HttpHandler, logger: Logger) -> Self {
        Self {
            handler: Arc::new(handler),
            logger,
        }
    }

    pub(crate) fn from_shared(handler: Arc<dyn HttpHandler>, logger: Logger) -> Self {
        Self { handler, logger }
    }

    /// Runs the handler and writes exactly one response.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let context = RequestContext::new(request_id, TransportKind::Http, request.uri().path());
        let logger = self
            .logger
            .with_request(&context.request_id, &context.subject_or_path);

        let result = self
            .handler
            .call(HttpRequest {
                request,
                logger: logger.clone(),
                context: context.clone(),
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => error_response(&logger, &err),
        };

        logger.info(format_args!("duration {}ms", context.elapsed().as_millis()));
        response
    }
}

impl std::fmt::Debug for ErrHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrHandler")
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

/// Classifies a handler error, logs it and renders the response for it.
pub fn error_response(logger: &Logger, err: &anyhow::Error) -> Response {
    let classified = classify(err);
    log_failure(logger, &classified);
    match classified {
        Classified::Client(client) => {
            let status =
                StatusCode::from_u16(client.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            json_response(status, client.body())
        }
        Classified::Internal(_) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            INTERNAL_ERROR_BODY.to_vec(),
        ),
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::capture_logs;
    use sencillo_core::{client_facing, ClientError, ClientFacing};

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(REQUEST_ID_HEADER, "01HZX3J5K6ABCDEFGHJKMNPQRS")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn success_passes_through() {
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async { anyhow::Ok((StatusCode::CREATED, "made").into_response()) },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_string(response).await, "made");
    }

    #[tokio::test]
    async fn client_error_writes_code_and_body() {
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async {
                Err::<Response, anyhow::Error>(ClientError::msg(404, "product not found").into())
            },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["errors"][0]["message"], "product not found");
        assert_eq!(body["errors"][0]["code"], "GEN1");
    }

    #[tokio::test]
    async fn client_error_found_behind_context() {
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async {
                let err = anyhow::Error::new(ClientError::msg(409, "conflict"))
                    .context("saving product");
                Err::<Response, _>(err)
            },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    impl ClientFacing for QuotaError {
        fn code(&self) -> u16 {
            429
        }

        fn body(&self) -> Vec<u8> {
            br#"{"errors":["quota exceeded"]}"#.to_vec()
        }

        fn logged_error(&self) -> String {
            "quota exceeded for tenant 7".to_string()
        }
    }

    #[tokio::test]
    async fn user_defined_client_error_keeps_its_code_and_body() {
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async { Err::<Response, _>(client_facing(QuotaError)) },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_string(response).await, r#"{"errors":["quota exceeded"]}"#);
    }

    #[tokio::test]
    async fn internal_error_is_masked_and_logged() {
        let (logs, _guard) = capture_logs();
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async { Err::<Response, _>(anyhow::anyhow!("db password rejected")) },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert_eq!(body.as_bytes(), INTERNAL_ERROR_BODY);
        assert!(!body.contains("password"));

        let out = logs.contents();
        assert!(out.contains("db password rejected"), "{out}");
        assert!(out.contains("request_id=01HZX3J5K6ABCDEFGHJKMNPQRS"), "{out}");
    }

    #[tokio::test]
    async fn auth_failures_log_at_error_level() {
        let (logs, _guard) = capture_logs();
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async {
                Err::<Response, anyhow::Error>(ClientError::msg(403, "forbidden").into())
            },
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let out = logs.contents();
        assert!(
            out.lines().any(|l| l.contains("ERROR") && l.contains("client error")),
            "{out}"
        );
    }

    #[tokio::test]
    async fn duration_is_logged_for_every_request() {
        let (logs, _guard) = capture_logs();
        let adapter = ErrHandler::new(
            |_req: HttpRequest| async { anyhow::Ok(StatusCode::OK.into_response()) },
            Logger::new("test"),
        );

        adapter.handle(request("/timed")).await;
        let out = logs.contents();
        assert!(out.contains("duration"), "{out}");
        assert!(out.contains("path=/timed"), "{out}");
    }

    #[tokio::test]
    async fn context_is_shared_with_handler() {
        async fn handler(_req: HttpRequest, greeting: Arc<String>) -> anyhow::Result<Response> {
            Ok(greeting.as_str().to_owned().into_response())
        }

        let adapter = ErrHandler::new(
            handle_with_context(handler, Arc::new("hello".to_string())),
            Logger::new("test"),
        );

        let response = adapter.handle(request("/x")).await;
        assert_eq!(body_string(response).await, "hello");
    }
}
