//! Sencillo Server: HTTP and messaging request adapters, per-registration
//! metrics, and graceful shutdown coordination.

pub mod lifecycle;
pub mod messaging;
pub mod network;
pub mod observability;

pub use lifecycle::{ShutdownConfig, ShutdownCoordinator, ShutdownTrigger, SignalSource, Transport};
pub use messaging::{Endpoint, EndpointGroup, MessageRequest, MessageService, Reply, ServiceInfo};
pub use network::{handle_with_context, HttpConfig, HttpRequest, HttpServer, Registration, Route};
pub use observability::{init_tracing, Logger, LoggingConfig, MetricsExporter, TracerProvider};

#[cfg(test)]
pub(crate) mod test_support;
