//! Request identifiers.
//!
//! Identifiers are ULIDs: lexicographically sortable by creation time and
//! globally unique without coordination. On the messaging surface the
//! identifier is never generated; it is carried in the routing subject as
//! the fourth dot-delimited token:
//!
//! ```text
//! <segment>.<segment>.<segment>.<request-id>.<rest>
//! ```

use std::fmt;
use std::str::FromStr;

use ulid::Ulid;

use crate::errors::{ClientError, ClientFacing};

/// Zero-based position of the request identifier within a subject.
pub const REQUEST_ID_SEGMENT: usize = 3;

/// Header carrying the request identifier on the HTTP surface.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Failure to derive a request identifier.
///
/// Both variants are caller mistakes and classify as 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid subject")]
    InvalidSubject,
    #[error("invalid request ID")]
    InvalidRequestId,
}

impl From<IdentityError> for ClientError {
    fn from(err: IdentityError) -> Self {
        ClientError::new(err, 400)
    }
}

impl ClientFacing for IdentityError {
    fn code(&self) -> u16 {
        400
    }

    fn body(&self) -> Vec<u8> {
        ClientError::from(*self).body()
    }

    fn logged_error(&self) -> String {
        ClientError::from(*self).logged_error()
    }
}

/// A sortable, globally-unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Generates a fresh identifier from the current time.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl FromStr for RequestId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|_| IdentityError::InvalidRequestId)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Extracts the request identifier embedded in a messaging subject.
///
/// # Errors
///
/// Returns `IdentityError::InvalidSubject` when the subject has fewer than
/// four tokens, and `IdentityError::InvalidRequestId` when the fourth token
/// is not a valid identifier.
pub fn subject_to_request_id(subject: &str) -> Result<RequestId, IdentityError> {
    let token = subject
        .split('.')
        .nth(REQUEST_ID_SEGMENT)
        .ok_or(IdentityError::InvalidSubject)?;
    token.parse()
}
