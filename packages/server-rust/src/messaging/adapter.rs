//! Messaging request adapter.
//!
//! Wraps a fallible handler (`(Logger, MessageRequest) -> anyhow::Result<()>`)
//! so that every request receives exactly one reply:
//!
//! 1. The request identifier is parsed from the subject; a bad subject is
//!    answered with a 400 before the handler runs.
//! 2. Bridge query parameters are normalized into headers.
//! 3. The handler runs with a logger carrying `request_id` and `path`,
//!    bounded by the endpoint's request timeout.
//! 4. A handler error is classified and written as the error reply. A
//!    handler that returns `Ok` without replying gets an empty success.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use sencillo_core::{
    classify, subject_to_request_id, Classified, ClientError, RequestContext, TransportKind,
    INTERNAL_ERROR_BODY, INTERNAL_ERROR_STATUS,
};
use tracing::warn;

use super::query::build_query_headers;
use super::request::{MessageRequest, Replier, Reply};
use crate::network::BoxFuture;
use crate::observability::{log_failure, Logger};

/// A fallible messaging handler.
///
/// Implemented for every `Fn(Logger, MessageRequest) -> impl Future<Output = anyhow::Result<()>>`.
pub trait MessageHandler: Send + Sync + 'static {
    fn call(&self, logger: Logger, request: MessageRequest) -> BoxFuture<anyhow::Result<()>>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Logger, MessageRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, logger: Logger, request: MessageRequest) -> BoxFuture<anyhow::Result<()>> {
        Box::pin(self(logger, request))
    }
}

/// Adapter wrapping one messaging handler.
#[derive(Clone)]
pub struct ErrorHandler {
    handler: Arc<dyn MessageHandler>,
    logger: Logger,
    timeout: Option<Duration>,
}

impl ErrorHandler {
    pub fn new(logger: Logger, handler: impl MessageHandler) -> Self {
        Self::from_shared(logger, Arc::new(handler))
    }

    pub(crate) fn from_shared(logger: Logger, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            logger,
            timeout: None,
        }
    }

    /// Fails the request with 504 once `timeout` elapses.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the handler and guarantees one reply.
    ///
    /// Returns the status of the reply that was written.
    pub async fn handle(&self, mut request: MessageRequest) -> u16 {
        let replier = request.replier();

        let id = match subject_to_request_id(request.subject()) {
            Ok(id) => id,
            Err(err) => {
                let logger = self.logger.with_request("", request.subject());
                return reply_error(&logger, &replier, &anyhow::Error::new(err));
            }
        };
        let context = RequestContext::new(id.to_string(), TransportKind::Message, request.subject());
        let logger = self
            .logger
            .with_request(&context.request_id, &context.subject_or_path);

        let status = match build_query_headers(request.headers_mut()) {
            Err(err) => reply_error(&logger, &replier, &ClientError::from(err).into()),
            Ok(()) => self.run(&logger, &replier, request).await,
        };

        logger.info(format_args!("duration {}ms", context.elapsed().as_millis()));
        status
    }

    async fn run(&self, logger: &Logger, replier: &Replier, request: MessageRequest) -> u16 {
        let call = self.handler.call(logger.clone(), request);
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .unwrap_or_else(|_| Err(ClientError::msg(504, "request timed out").into())),
            None => call.await,
        };

        match result {
            Ok(()) => {
                if let Some(status) = replier.sent_status() {
                    return status;
                }
                logger.warn("handler returned without replying; sending empty reply");
                let _ = replier.send(Reply::Success {
                    headers: HeaderMap::new(),
                    data: Bytes::new(),
                });
                200
            }
            Err(err) => reply_error(logger, replier, &err),
        }
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("logger", &self.logger)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Classifies `err` and writes the error reply.
///
/// If the handler already replied, the error is logged and the earlier
/// reply stands. Returns the status of whichever reply the requester got.
fn reply_error(logger: &Logger, replier: &Replier, err: &anyhow::Error) -> u16 {
    let classified = classify(err);
    log_failure(logger, &classified);

    let (code, body) = match classified {
        Classified::Client(client) => (client.code(), client.body()),
        Classified::Internal(_) => (INTERNAL_ERROR_STATUS, INTERNAL_ERROR_BODY.to_vec()),
    };
    let description = StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_string();

    let reply = Reply::Error {
        code: code.to_string(),
        description,
        body: Bytes::from(body),
    };
    if let Err(send_err) = replier.send(reply) {
        logger.span().in_scope(|| {
            warn!(error = %send_err, status = code, "error reply not delivered");
        });
    }
    replier.sent_status().unwrap_or(code)
}
