//! Messaging requests and their single reply.
//!
//! A request carries a subject, headers and a payload. Its reply slot can be
//! written exactly once; whoever writes first (the handler or the adapter)
//! decides what the requester receives.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

/// What the requester receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success {
        headers: HeaderMap,
        data: Bytes,
    },
    /// `code` is the numeric status as text, `description` its reason phrase.
    Error {
        code: String,
        description: String,
        body: Bytes,
    },
}

impl Reply {
    /// Status used for metrics: 200 for success, the parsed code otherwise.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Error { code, .. } => code.parse().unwrap_or(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("a reply was already sent for this request")]
    AlreadySent,
    #[error("the requester is no longer waiting for a reply")]
    Closed,
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
enum Slot {
    Pending(oneshot::Sender<Reply>),
    Sent(u16),
}

/// Shared handle to one request's reply slot.
#[derive(Debug, Clone)]
pub struct Replier {
    slot: Arc<Mutex<Slot>>,
}

impl Replier {
    fn new(tx: oneshot::Sender<Reply>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Pending(tx))),
        }
    }

    /// Writes the reply.
    ///
    /// # Errors
    ///
    /// `ReplyError::AlreadySent` on a second write. `ReplyError::Closed` when
    /// the requester went away; the slot still counts as written.
    pub fn send(&self, reply: Reply) -> Result<(), ReplyError> {
        let status = reply.status();
        let mut slot = self.slot.lock();
        let tx = match std::mem::replace(&mut *slot, Slot::Sent(status)) {
            Slot::Pending(tx) => tx,
            sent @ Slot::Sent(_) => {
                *slot = sent;
                return Err(ReplyError::AlreadySent);
            }
        };
        drop(slot);
        tx.send(reply).map_err(|_| ReplyError::Closed)
    }

    /// Status of the written reply, if any.
    #[must_use]
    pub fn sent_status(&self) -> Option<u16> {
        match &*self.slot.lock() {
            Slot::Pending(_) => None,
            Slot::Sent(status) => Some(*status),
        }
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent_status().is_some()
    }
}

/// One inbound messaging request.
#[derive(Debug)]
pub struct MessageRequest {
    subject: String,
    headers: HeaderMap,
    data: Bytes,
    replier: Replier,
}

impl MessageRequest {
    /// Creates a request and the receiver its reply will arrive on.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        headers: HeaderMap,
        data: impl Into<Bytes>,
    ) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            subject: subject.into(),
            headers,
            data: data.into(),
            replier: Replier::new(tx),
        };
        (request, rx)
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn replier(&self) -> Replier {
        self.replier.clone()
    }

    /// Replies with a payload and no headers.
    ///
    /// # Errors
    ///
    /// See [`Replier::send`].
    pub fn respond(&self, data: impl Into<Bytes>) -> Result<(), ReplyError> {
        self.respond_with_headers(data, HeaderMap::new())
    }

    /// Replies with a payload and headers.
    ///
    /// # Errors
    ///
    /// See [`Replier::send`].
    pub fn respond_with_headers(
        &self,
        data: impl Into<Bytes>,
        headers: HeaderMap,
    ) -> Result<(), ReplyError> {
        self.replier.send(Reply::Success {
            headers,
            data: data.into(),
        })
    }

    /// Replies with `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// `ReplyError::Encode` if `value` cannot be serialized; nothing is sent.
    pub fn respond_json<T: Serialize>(&self, value: &T) -> Result<(), ReplyError> {
        let data = serde_json::to_vec(value)?;
        self.respond(data)
    }

    /// Replies with an error status, description and body.
    ///
    /// # Errors
    ///
    /// See [`Replier::send`].
    pub fn error(
        &self,
        code: impl Into<String>,
        description: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<(), ReplyError> {
        self.replier.send(Reply::Error {
            code: code.into(),
            description: description.into(),
            body: body.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> (MessageRequest, oneshot::Receiver<Reply>) {
        MessageRequest::new("svc.group.endpoint.id.get", HeaderMap::new(), "payload")
    }

    #[tokio::test]
    async fn respond_delivers_payload() {
        let (request, rx) = request();
        request.respond("hello").unwrap();

        match rx.await.unwrap() {
            Reply::Success { data, headers } => {
                assert_eq!(data, Bytes::from_static(b"hello"));
                assert!(headers.is_empty());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn respond_json_encodes_value() {
        let (request, rx) = request();
        request.respond_json(&json!({"id": 7})).unwrap();

        let Reply::Success { data, .. } = rx.await.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(&data[..], br#"{"id":7}"#);
    }

    #[test]
    fn second_write_is_rejected() {
        let (request, _rx) = request();
        request.respond("first").unwrap();

        let err = request.error("500", "Internal Server Error", "").unwrap_err();
        assert!(matches!(err, ReplyError::AlreadySent));
        assert_eq!(request.replier().sent_status(), Some(200));
    }

    #[test]
    fn error_reply_records_status() {
        let (request, _rx) = request();
        request.error("404", "Not Found", "{}").unwrap();
        assert_eq!(request.replier().sent_status(), Some(404));
    }

    #[test]
    fn closed_requester_still_consumes_the_slot() {
        let (request, rx) = request();
        drop(rx);

        assert!(matches!(request.respond("late"), Err(ReplyError::Closed)));
        assert!(request.replier().is_sent());
    }

    #[test]
    fn non_numeric_error_code_counts_as_500() {
        let reply = Reply::Error {
            code: "oops".to_string(),
            description: String::new(),
            body: Bytes::new(),
        };
        assert_eq!(reply.status(), 500);
    }
}
