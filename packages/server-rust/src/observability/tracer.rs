use async_trait::async_trait;

/// A distributed-tracing backend that must flush before the process exits.
///
/// The shutdown coordinator calls `shutdown` once, before draining any
/// transport, and bounds it by the shutdown timeout.
#[async_trait]
pub trait TracerProvider: Send + Sync {
    /// Flushes buffered spans and releases exporter resources.
    async fn shutdown(&self) -> anyhow::Result<()>;
}
