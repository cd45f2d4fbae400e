//! HTTP surface: configuration, request adapter, middleware and server.

pub mod adapter;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use adapter::{error_response, handle_with_context, BoxFuture, ErrHandler, HttpHandler, HttpRequest};
pub use config::HttpConfig;
pub use handlers::AppState;
pub use module::{HttpServer, HttpTransport, Registration, RegistrationError, Route};
