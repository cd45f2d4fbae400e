//! Messaging request/reply surface.
//!
//! Broker-agnostic: a transport hands each inbound message to
//! [`MessageService::dispatch`] and forwards the returned [`Reply`].

pub mod adapter;
pub mod query;
pub mod request;
pub mod service;

pub use adapter::{ErrorHandler, MessageHandler};
pub use query::{
    build_query_headers, query_header_values, QueryHeaderError, BRIDGE_QUERY_HEADER,
    QUERY_HEADER_PREFIX,
};
pub use request::{MessageRequest, Replier, Reply, ReplyError};
pub use service::{
    subject_matches, DispatchError, Endpoint, EndpointConfig, EndpointGroup, GroupError,
    MessageService, ServiceInfo,
};
