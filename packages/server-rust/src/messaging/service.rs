//! Messaging service: endpoint groups, subject routing and draining.
//!
//! Endpoints are grouped under a subject prefix. The service matches each
//! inbound subject against the endpoint patterns (`*` matches one token,
//! `>` one or more trailing tokens), runs the endpoint's adapter and
//! returns the single reply. The underlying broker connection is out of
//! scope: a transport calls [`MessageService::dispatch`] once per message,
//! on its own task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use sencillo_core::{MetricNames, TransportKind};
use tracing::info;

use super::adapter::{ErrorHandler, MessageHandler};
use super::request::{MessageRequest, Reply};
use crate::lifecycle::{ShutdownController, Transport};
use crate::observability::{Logger, MetricsError, MetricsExporter, RequestMetrics};

/// Identity advertised by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Per-endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Requests still running after this answer 504. `None` disables the bound.
    pub request_timeout: Option<Duration>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// One handler bound to a subject relative to its group.
#[derive(Clone)]
pub struct Endpoint {
    name: String,
    subject: String,
    handler: Arc<dyn MessageHandler>,
    metadata: HashMap<String, String>,
    config: Option<EndpointConfig>,
}

impl Endpoint {
    /// The subject defaults to the endpoint name.
    pub fn new(name: impl Into<String>, handler: impl MessageHandler) -> Self {
        let name = name.into();
        Self {
            subject: name.clone(),
            name,
            handler: Arc::new(handler),
            metadata: HashMap::new(),
            config: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the service-wide endpoint settings.
    #[must_use]
    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("subject", &self.subject)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Endpoints sharing a subject prefix and one set of collectors.
#[derive(Debug, Clone)]
pub struct EndpointGroup {
    prefix: String,
    endpoints: Vec<Endpoint>,
}

impl EndpointGroup {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            endpoints: Vec::new(),
        }
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Collector names, or `None` for a group without endpoints.
    #[must_use]
    pub fn metric_names(&self) -> Option<MetricNames> {
        self.endpoints
            .first()
            .map(|endpoint| MetricNames::new(TransportKind::Message, &self.prefix, &endpoint.subject))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no endpoint matches subject {subject:?}")]
    NoResponders { subject: String },
    #[error("service is draining")]
    Draining,
    #[error("service has not been started")]
    NotStarted,
    #[error("endpoint did not produce a reply")]
    NoReply,
}

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("endpoint group {prefix:?} has no endpoints")]
    Empty { prefix: String },
    #[error("subject {pattern:?} is already served")]
    DuplicateSubject { pattern: String },
    #[error("endpoints cannot be added after start")]
    AlreadyStarted,
}

/// Whether `subject` matches `pattern`. Tokens are dot-separated.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn full_subject(prefix: &str, subject: &str) -> String {
    let prefix = prefix.trim_end_matches('.');
    if prefix.is_empty() {
        subject.to_string()
    } else {
        format!("{prefix}.{subject}")
    }
}

struct Bound {
    pattern: String,
    name: String,
    adapter: ErrorHandler,
    metrics: RequestMetrics,
}

/// A messaging service built from endpoint groups.
///
/// Add groups, call `start()`, then share the service (usually in an `Arc`)
/// with the transport that calls `dispatch()`.
pub struct MessageService {
    info: ServiceInfo,
    logger: Logger,
    exporter: MetricsExporter,
    config: EndpointConfig,
    endpoints: Vec<Bound>,
    collectors: Vec<RequestMetrics>,
    shutdown: Arc<ShutdownController>,
    started: bool,
}

impl MessageService {
    #[must_use]
    pub fn new(info: ServiceInfo, logger: Logger, exporter: MetricsExporter) -> Self {
        Self {
            info,
            logger,
            exporter,
            config: EndpointConfig::default(),
            endpoints: Vec::new(),
            collectors: Vec::new(),
            shutdown: Arc::new(ShutdownController::new()),
            started: false,
        }
    }

    /// Default settings for endpoints that carry none of their own.
    #[must_use]
    pub fn with_endpoint_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Adds one endpoint with no prefix.
    ///
    /// # Errors
    ///
    /// See [`add_group`](Self::add_group).
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> Result<(), GroupError> {
        self.add_group(EndpointGroup::new("").endpoint(endpoint))
    }

    /// Adds a group of endpoints under its prefix.
    ///
    /// # Errors
    ///
    /// Rejects empty groups, subjects that are already served and groups
    /// added after `start()`.
    pub fn add_group(&mut self, group: EndpointGroup) -> Result<(), GroupError> {
        if self.started {
            return Err(GroupError::AlreadyStarted);
        }
        let Some(names) = group.metric_names() else {
            return Err(GroupError::Empty {
                prefix: group.prefix,
            });
        };

        let patterns: Vec<String> = group
            .endpoints
            .iter()
            .map(|endpoint| full_subject(&group.prefix, &endpoint.subject))
            .collect();
        for (i, pattern) in patterns.iter().enumerate() {
            let taken = self.endpoints.iter().any(|bound| &bound.pattern == pattern)
                || patterns[..i].contains(pattern);
            if taken {
                return Err(GroupError::DuplicateSubject {
                    pattern: pattern.clone(),
                });
            }
        }

        let metrics = self.exporter.collectors(names);
        for (endpoint, pattern) in group.endpoints.into_iter().zip(patterns) {
            let timeout = endpoint
                .config
                .as_ref()
                .unwrap_or(&self.config)
                .request_timeout;
            let adapter = ErrorHandler::from_shared(self.logger.clone(), endpoint.handler)
                .with_timeout(timeout);
            info!(service = %self.info.name, endpoint = %endpoint.name, subject = %pattern, "added endpoint");
            self.endpoints.push(Bound {
                pattern,
                name: endpoint.name,
                adapter,
                metrics: metrics.clone(),
            });
        }
        self.collectors.push(metrics);
        Ok(())
    }

    /// Registers every group's collectors. Further groups are rejected.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::DuplicateRegistration` on a name collision.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        for metrics in &self.collectors {
            self.exporter.register(metrics)?;
        }
        self.started = true;
        info!(
            service = %self.info.name,
            version = %self.info.version,
            endpoints = self.endpoints.len(),
            "messaging service started"
        );
        Ok(())
    }

    /// Routes one message to its endpoint and waits for the reply.
    ///
    /// The first endpoint whose pattern matches wins.
    ///
    /// # Errors
    ///
    /// `NotStarted` before `start()`, `Draining` once shutdown began,
    /// `NoResponders` when nothing matches.
    pub async fn dispatch(
        &self,
        subject: &str,
        headers: HeaderMap,
        data: impl Into<Bytes>,
    ) -> Result<Reply, DispatchError> {
        if !self.started {
            return Err(DispatchError::NotStarted);
        }
        let Some(_guard) = self.shutdown.try_admit() else {
            return Err(DispatchError::Draining);
        };
        let bound = self
            .endpoints
            .iter()
            .find(|bound| subject_matches(&bound.pattern, subject))
            .ok_or_else(|| DispatchError::NoResponders {
                subject: subject.to_string(),
            })?;

        let start = Instant::now();
        let (request, reply) = MessageRequest::new(subject, headers, data);
        let status = bound.adapter.handle(request).await;
        bound
            .metrics
            .observe(status, &bound.name, &bound.pattern, start.elapsed());

        reply.await.map_err(|_| DispatchError::NoReply)
    }
}

impl std::fmt::Debug for MessageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<&str> = self.endpoints.iter().map(|b| b.pattern.as_str()).collect();
        f.debug_struct("MessageService")
            .field("info", &self.info)
            .field("endpoints", &patterns)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MessageService {
    fn name(&self) -> &str {
        &self.info.name
    }

    /// Rejects new messages, then waits for every in-flight one.
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown.begin_drain();
        while !self.shutdown.wait_for_drain(Duration::from_secs(1)).await {
            info!(
                in_flight = self.shutdown.in_flight_count(),
                "waiting for in-flight messages"
            );
        }
        Ok(())
    }
}
