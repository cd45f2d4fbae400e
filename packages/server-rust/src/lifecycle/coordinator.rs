//! Process shutdown sequencing.
//!
//! Watchers (OS signals, a transport's serve future, health checks) race to
//! post a reason into a one-slot channel. The first post wins; later posts
//! are dropped. The coordinator then runs, in order and each bounded by the
//! shutdown timeout: tracer flush, transport drain, final log line. Timeouts
//! and failures in either step are logged and do not stop the sequence.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::observability::{Logger, TracerProvider};

/// Exit status used once shutdown completes.
pub const EXIT_CODE: i32 = 1;

/// Something that can stop accepting work and wait for in-flight work.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Stops accepting new work and resolves once in-flight work is done.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Bound applied separately to the tracer flush and to each transport drain.
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Who asked for shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    OsSignal,
    TransportError,
    HealthWatcher,
}

impl SignalSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OsSignal => "os_signal",
            Self::TransportError => "transport_error",
            Self::HealthWatcher => "health_watcher",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSignal {
    pub source: SignalSource,
    pub reason: String,
}

/// Cloneable sender side handed to watchers.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<ShutdownSignal>,
}

impl ShutdownTrigger {
    /// Posts a shutdown reason without blocking.
    ///
    /// Returns `false` when another reason already occupies the slot.
    pub fn fire(&self, source: SignalSource, reason: impl Into<String>) -> bool {
        self.tx
            .try_send(ShutdownSignal {
                source,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// How one shutdown step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub signal: ShutdownSignal,
    pub tracer: StepOutcome,
    pub transports: Vec<(String, StepOutcome)>,
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    logger: Logger,
    tracer: Option<Arc<dyn TracerProvider>>,
    tx: mpsc::Sender<ShutdownSignal>,
    rx: mpsc::Receiver<ShutdownSignal>,
    watchers: Vec<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(config: ShutdownConfig, logger: Logger) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            config,
            logger,
            tracer: None,
            tx,
            rx,
            watchers: Vec::new(),
        }
    }

    /// Flushed before any transport is drained.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn TracerProvider>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    #[must_use]
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Watches SIGINT and SIGTERM (Ctrl-C elsewhere).
    pub fn watch_os_signals(&mut self) {
        self.watch_signal(os_signal());
    }

    /// Posts an `OsSignal` reason once `signal` resolves with the signal name.
    pub fn watch_signal<F>(&mut self, signal: F)
    where
        F: Future<Output = String> + Send + 'static,
    {
        let trigger = self.trigger();
        self.watchers.push(tokio::spawn(async move {
            let name = signal.await;
            trigger.fire(SignalSource::OsSignal, format!("received signal: {name}"));
        }));
    }

    /// Runs a transport's serve future; an error posts a `TransportError` reason.
    ///
    /// A clean return means the transport was already asked to stop.
    pub fn watch_transport<F>(&mut self, serve: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let trigger = self.trigger();
        let logger = self.logger.clone();
        self.watchers.push(tokio::spawn(async move {
            if let Err(err) = serve.await {
                logger
                    .span()
                    .in_scope(|| error!(error = %format!("{err:#}"), "transport stopped with error"));
                trigger.fire(SignalSource::TransportError, format!("{err:#}"));
            }
        }));
    }

    /// Spawns a health watcher. It posts through the trigger when unhealthy.
    pub fn add_health_watcher<F, Fut>(&mut self, watcher: F)
    where
        F: FnOnce(ShutdownTrigger) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.watchers.push(tokio::spawn(watcher(self.trigger())));
    }

    /// Waits for the first shutdown reason and runs the bounded sequence.
    ///
    /// Does not exit the process; see [`run_and_exit`](Self::run_and_exit).
    pub async fn run(mut self, transports: &[&dyn Transport]) -> ShutdownReport {
        let signal = self.rx.recv().await.unwrap_or_else(|| ShutdownSignal {
            source: SignalSource::HealthWatcher,
            reason: "every shutdown trigger was dropped".to_string(),
        });
        self.logger.span().in_scope(|| {
            info!(source = %signal.source, reason = %signal.reason, "shutting down server");
        });

        let timeout = self.config.timeout;
        let tracer = match &self.tracer {
            Some(tracer) => self.bounded("tracer", timeout, tracer.shutdown()).await,
            None => StepOutcome::Skipped,
        };

        let mut outcomes = Vec::with_capacity(transports.len());
        for transport in transports {
            let outcome = self
                .bounded(transport.name(), timeout, transport.shutdown())
                .await;
            outcomes.push((transport.name().to_string(), outcome));
        }

        for watcher in &self.watchers {
            watcher.abort();
        }
        self.logger.info("server stopped");

        ShutdownReport {
            signal,
            tracer,
            transports: outcomes,
        }
    }

    /// Runs the sequence, then exits the process with [`EXIT_CODE`].
    pub async fn run_and_exit(self, transports: &[&dyn Transport]) {
        self.run(transports).await;
        std::process::exit(EXIT_CODE);
    }

    async fn bounded<F>(&self, step: &str, timeout: Duration, fut: F) -> StepOutcome
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let outcome = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(())) => StepOutcome::Completed,
            Ok(Err(err)) => StepOutcome::Failed(format!("{err:#}")),
            Err(_) => StepOutcome::TimedOut,
        };
        self.logger.span().in_scope(|| match &outcome {
            StepOutcome::Completed => info!(step, "shutdown step completed"),
            StepOutcome::Failed(err) => error!(step, error = %err, "shutdown step failed"),
            StepOutcome::TimedOut => {
                warn!(step, timeout_ms = timeout.as_millis(), "shutdown step timed out");
            }
            StepOutcome::Skipped => {}
        });
        outcome
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("config", &self.config)
            .field("tracer", &self.tracer.is_some())
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

/// Resolves with the signal name. A failing signal listener never resolves.
async fn os_signal() -> String {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    () = ctrl_c() => "SIGINT".to_string(),
                    _ = terminate.recv() => "SIGTERM".to_string(),
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                ctrl_c().await;
                "SIGINT".to_string()
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "interrupt".to_string()
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
