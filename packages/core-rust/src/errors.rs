//! Caller-facing error taxonomy.
//!
//! A [`ClientError`] carries a status code and a caller-safe message. Its
//! [`body`](ClientFacing::body) is what the caller sees; the wrapped cause is
//! only ever rendered through [`logged_error`](ClientFacing::logged_error).
//!
//! Anything that does not implement [`ClientFacing`] is treated as an
//! internal failure by the request adapters. [`classify`] is the single place
//! where that decision is made.
//!
//! `anyhow` erases concrete types, so an implementor defined outside this
//! crate is raised through [`client_facing`] (or
//! [`ClientFacingExt::client_facing`]), which keeps the capability reachable
//! from the error chain.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::identity::IdentityError;

/// Metadata code attached to client errors when none is supplied.
pub const DEFAULT_ERROR_CODE: &str = "GEN1";

/// Metadata `type` attached to client errors when none is supplied.
pub const DEFAULT_ERROR_TYPE: &str = "api";

/// Metadata `level` attached to client errors when none is supplied.
pub const DEFAULT_ERROR_LEVEL: &str = "warning";

/// Body written for every unclassified failure. Never parameterized.
pub const INTERNAL_ERROR_BODY: &[u8] = br#"{"errors":["internal server error"]}"#;

/// Status used for every unclassified failure.
pub const INTERNAL_ERROR_STATUS: u16 = 500;

// ---------------------------------------------------------------------------
// ErrorMetadata
// ---------------------------------------------------------------------------

/// A single structured entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMetadata {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub level: String,
}

impl ErrorMetadata {
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        kind: impl Into<String>,
        level: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: kind.into(),
            level: level.into(),
        }
    }

    fn defaulted(code: &str, message: &str) -> Self {
        Self::new(code, message, DEFAULT_ERROR_TYPE, DEFAULT_ERROR_LEVEL)
    }
}

// ---------------------------------------------------------------------------
// ClientFacing
// ---------------------------------------------------------------------------

/// Capability set of an error that may be shown to the caller.
///
/// `Display` is the caller-safe message, `code` the status, `body` the wire
/// encoding and `logged_error` the internal-only rendering.
pub trait ClientFacing: std::error::Error + Send + Sync + 'static {
    /// Status code to reply with.
    fn code(&self) -> u16;

    /// JSON body to reply with.
    fn body(&self) -> Vec<u8>;

    /// Internal rendering including the cause. Must never reach the caller.
    fn logged_error(&self) -> String;
}

/// Result of classifying a handler error at the adapter boundary.
pub enum Classified<'a> {
    /// The error (or something in its chain) is safe to show to the caller.
    Client(&'a dyn ClientFacing),
    /// Everything else. Logged in full, replied to generically.
    Internal(&'a anyhow::Error),
}

/// Classifies a handler error.
///
/// Walks the whole `anyhow` chain so a [`ClientError`] wrapped with
/// `.context(..)` is still recognised, as is any [`ClientFacing`] value
/// raised through [`ClientFacingError`].
#[must_use]
pub fn classify(err: &anyhow::Error) -> Classified<'_> {
    for cause in err.chain() {
        if let Some(erased) = cause.downcast_ref::<ClientFacingError>() {
            return Classified::Client(erased.inner());
        }
        if let Some(client) = cause.downcast_ref::<ClientError>() {
            return Classified::Client(client);
        }
        if let Some(identity) = cause.downcast_ref::<IdentityError>() {
            return Classified::Client(identity);
        }
    }
    Classified::Internal(err)
}

/// Type-erased [`ClientFacing`] value that survives conversion into
/// `anyhow::Error`.
pub struct ClientFacingError(Box<dyn ClientFacing>);

impl ClientFacingError {
    #[must_use]
    pub fn new(err: impl ClientFacing) -> Self {
        Self(Box::new(err))
    }

    /// The wrapped error, with its capabilities.
    #[must_use]
    pub fn inner(&self) -> &dyn ClientFacing {
        self.0.as_ref()
    }
}

impl<T: ClientFacing> From<T> for ClientFacingError {
    fn from(err: T) -> Self {
        Self::new(err)
    }
}

impl fmt::Display for ClientFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for ClientFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for ClientFacingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Converts any [`ClientFacing`] value into an `anyhow::Error` that
/// [`classify`] recognises.
#[must_use]
pub fn client_facing(err: impl ClientFacing) -> anyhow::Error {
    anyhow::Error::new(ClientFacingError::new(err))
}

/// `?`-friendly form of [`client_facing`].
pub trait ClientFacingExt<T> {
    /// Maps the error through [`client_facing`].
    ///
    /// # Errors
    ///
    /// Returns the original error, still classified as client-facing.
    fn client_facing(self) -> anyhow::Result<T>;
}

impl<T, E: ClientFacing> ClientFacingExt<T> for Result<T, E> {
    fn client_facing(self) -> anyhow::Result<T> {
        self.map_err(client_facing)
    }
}

// ---------------------------------------------------------------------------
// ClientError
// ---------------------------------------------------------------------------

/// A classified, caller-facing error.
///
/// Immutable once built; the `with_*` methods return modified copies.
#[derive(Clone)]
pub struct ClientError {
    status: u16,
    details: String,
    metadata: Option<Vec<ErrorMetadata>>,
    params: Option<Map<String, Value>>,
    cause: Option<Arc<anyhow::Error>>,
}

impl ClientError {
    /// Creates a client error with the default metadata record.
    ///
    /// `details` is the cause's message.
    #[must_use]
    pub fn new(cause: impl Into<anyhow::Error>, status: u16) -> Self {
        Self::builder(cause, status).build()
    }

    /// Shorthand for a client error built from a plain message.
    #[must_use]
    pub fn msg(status: u16, message: impl fmt::Display) -> Self {
        Self::new(anyhow::anyhow!("{message}"), status)
    }

    /// Starts building a client error with non-default options.
    #[must_use]
    pub fn builder(cause: impl Into<anyhow::Error>, status: u16) -> ClientErrorBuilder {
        ClientErrorBuilder::new(cause.into(), status)
    }

    /// Returns a copy whose metadata list is replaced by `records`.
    #[must_use]
    pub fn with_metadata_errors(&self, records: impl IntoIterator<Item = ErrorMetadata>) -> Self {
        Self {
            metadata: Some(records.into_iter().collect()),
            ..self.clone()
        }
    }

    /// Returns a copy with the additional params replaced.
    #[must_use]
    pub fn with_params(&self, params: Map<String, Value>) -> Self {
        Self {
            params: Some(params),
            ..self.clone()
        }
    }

    /// Caller-safe message.
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&[ErrorMetadata]> {
        self.metadata.as_deref()
    }

    #[must_use]
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.params.as_ref()
    }

    /// Whether the status is 401 or 403.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        is_auth_status(self.status)
    }
}

/// Whether `status` belongs to the authentication/authorization class.
#[must_use]
pub fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

#[derive(Serialize)]
#[serde(untagged)]
enum Entries<'a> {
    Detailed(&'a [ErrorMetadata]),
    Plain([&'a str; 1]),
}

#[derive(Serialize)]
struct Envelope<'a> {
    errors: Entries<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Map<String, Value>>,
}

impl ClientFacing for ClientError {
    fn code(&self) -> u16 {
        self.status
    }

    fn body(&self) -> Vec<u8> {
        let errors = match &self.metadata {
            Some(records) => Entries::Detailed(records),
            None => Entries::Plain([self.details.as_str()]),
        };
        let envelope = Envelope {
            errors,
            params: self.params.as_ref(),
        };
        // Strings and JSON values always serialize; the fallback is unreachable in practice.
        serde_json::to_vec(&envelope).unwrap_or_else(|_| INTERNAL_ERROR_BODY.to_vec())
    }

    fn logged_error(&self) -> String {
        let mut out = format!("status={} details={:?}", self.status, self.details);
        if let Some(records) = &self.metadata {
            let codes: Vec<String> = records
                .iter()
                .map(|m| format!("{}[{}/{}]: {}", m.code, m.kind, m.level, m.message))
                .collect();
            let _ = write!(out, " metadata=[{}]", codes.join(", "));
        }
        if let Some(cause) = &self.cause {
            let _ = write!(out, " cause={cause:#}");
        }
        out
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.details)
    }
}

impl fmt::Debug for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientError")
            .field("status", &self.status)
            .field("details", &self.details)
            .field("metadata", &self.metadata)
            .field("params", &self.params)
            .field("cause", &self.cause.as_ref().map(|c| format!("{c:#}")))
            .finish()
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| {
            let inner: &(dyn std::error::Error + Send + Sync + 'static) = cause.as_ref();
            inner as &(dyn std::error::Error + 'static)
        })
    }
}

// ---------------------------------------------------------------------------
// ClientErrorBuilder
// ---------------------------------------------------------------------------

/// Builder for [`ClientError`] options.
#[derive(Debug)]
pub struct ClientErrorBuilder {
    status: u16,
    details: String,
    cause: anyhow::Error,
    default_code: String,
    metadata: Option<Vec<ErrorMetadata>>,
    with_metadata: bool,
    params: Option<Map<String, Value>>,
}

impl ClientErrorBuilder {
    fn new(cause: anyhow::Error, status: u16) -> Self {
        Self {
            status,
            details: cause.to_string(),
            cause,
            default_code: DEFAULT_ERROR_CODE.to_string(),
            metadata: None,
            with_metadata: true,
            params: None,
        }
    }

    /// Replaces the internal cause without changing the caller-safe details.
    #[must_use]
    pub fn detailed_error(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = cause.into();
        self
    }

    /// Params rendered next to `errors` under the `params` key.
    #[must_use]
    pub fn additional_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    /// Code used for the default metadata record.
    #[must_use]
    pub fn default_code(mut self, code: impl Into<String>) -> Self {
        self.default_code = code.into();
        self
    }

    /// Explicit metadata records instead of the default one.
    #[must_use]
    pub fn metadata(mut self, records: impl IntoIterator<Item = ErrorMetadata>) -> Self {
        self.metadata = Some(records.into_iter().collect());
        self.with_metadata = true;
        self
    }

    /// Render the plain `{"errors": ["<details>"]}` form.
    #[must_use]
    pub fn without_metadata(mut self) -> Self {
        self.metadata = None;
        self.with_metadata = false;
        self
    }

    #[must_use]
    pub fn build(self) -> ClientError {
        let metadata = if self.with_metadata {
            Some(
                self.metadata
                    .unwrap_or_else(|| vec![ErrorMetadata::defaulted(&self.default_code, &self.details)]),
            )
        } else {
            None
        };
        ClientError {
            status: self.status,
            details: self.details,
            metadata,
            params: self.params,
            cause: Some(Arc::new(self.cause)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
