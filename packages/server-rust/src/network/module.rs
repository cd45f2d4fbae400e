//! HTTP server with deferred startup.
//!
//! `new()` creates shared resources, `register()` mounts route groups,
//! `start()` binds the TCP listener and `serve()` accepts connections until
//! the shutdown controller starts draining. Collectors are registered in
//! the metrics exporter when `serve()` begins, so a name collision aborts
//! startup before any traffic is accepted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::routing::{get, MethodFilter, MethodRouter};
use axum::Router;
use sencillo_core::{MetricNames, TransportKind};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::adapter::{ErrHandler, HttpHandler};
use super::config::HttpConfig;
use super::handlers::{health_handler, metrics_handler, AppState};
use super::middleware::{
    build_http_layers, request_id_layers, request_timeout_layer, track_in_flight, CodeStatsLayer,
};
use crate::lifecycle::{ShutdownController, Transport};
use crate::observability::{Logger, MetricsError, MetricsExporter, RequestMetrics};

/// One method and path served by a handler.
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    handler: Arc<dyn HttpHandler>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn patch(path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self::new(Method::PATCH, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self::new(Method::DELETE, path, handler)
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

type RouterMiddleware = Box<dyn FnOnce(Router) -> Router + Send>;

/// A prefix, its routes and optional middleware, mounted as one sub-router.
///
/// Each registration gets its own counter and histogram, named after the
/// prefix and the first route's path.
pub struct Registration {
    prefix: String,
    routes: Vec<Route>,
    middleware: Vec<RouterMiddleware>,
}

impl Registration {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
            middleware: Vec::new(),
        }
    }

    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Wraps the sub-router, inside the timeout, request identity and code
    /// stats.
    #[must_use]
    pub fn with_middleware(mut self, middleware: impl FnOnce(Router) -> Router + Send + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Collector names, or `None` for a registration without routes.
    #[must_use]
    pub fn metric_names(&self) -> Option<MetricNames> {
        self.routes
            .first()
            .map(|route| MetricNames::new(TransportKind::Http, &self.prefix, &route.path))
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration {prefix:?} has no routes")]
    Empty { prefix: String },
    #[error("prefix {prefix:?} is already registered")]
    DuplicatePrefix { prefix: String },
    #[error("route {method} {path} is registered twice")]
    DuplicateRoute { method: Method, path: String },
    #[error("method {method} cannot be routed")]
    UnsupportedMethod { method: Method },
}

/// `/api/v1/` and `api/v1` both mount at `/api/v1`; the root mounts at `""`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Manages the HTTP server lifecycle.
pub struct HttpServer {
    config: HttpConfig,
    logger: Logger,
    exporter: MetricsExporter,
    shutdown: Arc<ShutdownController>,
    router: Router,
    prefixes: HashSet<String>,
    collectors: Vec<RequestMetrics>,
    listener: Option<TcpListener>,
}

impl HttpServer {
    /// Creates a server without binding any port.
    #[must_use]
    pub fn new(config: HttpConfig, logger: Logger, exporter: MetricsExporter) -> Self {
        Self {
            config,
            logger,
            exporter,
            shutdown: Arc::new(ShutdownController::new()),
            router: Router::new(),
            prefixes: HashSet::new(),
            collectors: Vec::new(),
            listener: None,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn exporter(&self) -> &MetricsExporter {
        &self.exporter
    }

    /// Handle the shutdown coordinator uses to drain this server.
    #[must_use]
    pub fn transport(&self) -> HttpTransport {
        HttpTransport {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Mounts a registration under its prefix.
    ///
    /// # Errors
    ///
    /// Rejects registrations without routes, a prefix mounted twice, a
    /// method and path registered twice, paths shadowing the built-in
    /// routes, and methods axum cannot route.
    pub fn register(&mut self, registration: Registration) -> Result<(), RegistrationError> {
        let Some(names) = registration.metric_names() else {
            return Err(RegistrationError::Empty {
                prefix: registration.prefix,
            });
        };
        let prefix = normalize_prefix(&registration.prefix);
        if self.prefixes.contains(&prefix) {
            return Err(RegistrationError::DuplicatePrefix { prefix });
        }

        let mut seen = HashSet::new();
        let mut by_path: HashMap<String, MethodRouter> = HashMap::new();
        let mut order = Vec::new();
        for route in registration.routes {
            let path = normalize_path(&route.path);
            let full = format!("{prefix}{path}");
            if full == self.config.health_path || full == self.config.metrics_path {
                return Err(RegistrationError::DuplicateRoute {
                    method: route.method,
                    path: full,
                });
            }
            if !seen.insert((route.method.clone(), path.clone())) {
                return Err(RegistrationError::DuplicateRoute {
                    method: route.method,
                    path: full,
                });
            }
            let filter = MethodFilter::try_from(route.method.clone()).map_err(|_| {
                RegistrationError::UnsupportedMethod {
                    method: route.method.clone(),
                }
            })?;

            let adapter = ErrHandler::from_shared(route.handler, self.logger.clone());
            let handler = move |request: Request| {
                let adapter = adapter.clone();
                async move { adapter.handle(request).await }
            };

            let method_router = match by_path.remove(&path) {
                Some(existing) => existing.on(filter, handler),
                None => {
                    order.push(path.clone());
                    MethodRouter::new().on(filter, handler)
                }
            };
            by_path.insert(path, method_router);
        }

        let mut sub = Router::new();
        for path in order {
            if let Some(method_router) = by_path.remove(&path) {
                sub = sub.route(&path, method_router);
            }
        }
        // Unmatched paths under the prefix are answered here so they are counted.
        sub = sub.fallback(|| async { StatusCode::NOT_FOUND });
        for middleware in registration.middleware {
            sub = middleware(sub);
        }
        let metrics = self.exporter.collectors(names);
        sub = sub
            .layer(request_timeout_layer(self.config.request_timeout))
            .layer(request_id_layers())
            .layer(CodeStatsLayer::new(metrics.clone()));

        let router = std::mem::take(&mut self.router);
        self.router = if prefix.is_empty() {
            router.merge(sub)
        } else {
            router.nest(&prefix, sub)
        };
        info!(prefix = %prefix, counter = %metrics.names().counter, "registered routes");
        self.prefixes.insert(prefix);
        self.collectors.push(metrics);
        Ok(())
    }

    /// Registers every registration's collectors with the exporter.
    ///
    /// Called by `serve()`; exposed so in-process routers can be driven
    /// without a listener.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::DuplicateRegistration` on a name collision.
    pub fn register_metrics(&self) -> Result<(), MetricsError> {
        for metrics in &self.collectors {
            self.exporter.register(metrics)?;
        }
        Ok(())
    }

    /// Assembles registrations, built-in routes and server-wide layers.
    ///
    /// Built-in routes stay reachable while draining; registrations answer 503.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            exporter: self.exporter.clone(),
        };
        let builtins = Router::new()
            .route(&self.config.health_path, get(health_handler))
            .route(&self.config.metrics_path, get(metrics_handler))
            .with_state(state);

        self.router
            .clone()
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.shutdown),
                track_in_flight,
            ))
            .merge(builtins)
            .layer(build_http_layers())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound port, which differs from the configured one when
    /// port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown controller starts draining,
    /// then waits for in-flight requests and marks the server stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if collector names
    /// collide, or on a fatal I/O error.
    pub async fn serve(mut self) -> anyhow::Result<()> {
        let result = self.serve_inner().await;
        self.shutdown.mark_stopped();
        result
    }

    async fn serve_inner(&mut self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        self.register_metrics()?;
        let router = self.build_router();

        info!("Serving HTTP connections");
        axum::serve(listener, router)
            .with_graceful_shutdown(self.shutdown.drained())
            .await?;

        if self.shutdown.wait_for_drain(self.config.shutdown_timeout).await {
            info!("All in-flight requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "Drain timeout expired with in-flight requests remaining"
            );
        }
        Ok(())
    }
}

/// Drain handle for a serving [`HttpServer`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    shutdown: Arc<ShutdownController>,
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown.begin_drain();
        self.shutdown.wait_stopped().await;
        Ok(())
    }
}
