//! Query parameters forwarded by an HTTP-to-messaging bridge.
//!
//! The bridge delivers the original URL query string, still URL-encoded, in
//! one header. Before a handler runs, every parameter is re-emitted as its
//! own `x-sencillo-<name>` header so handlers never parse bridge formats.

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use sencillo_core::ClientError;

/// Header the bridge writes the raw query string into.
pub const BRIDGE_QUERY_HEADER: &str = "x-natsbridge-urlquery";

/// Namespace for normalized query headers.
pub const QUERY_HEADER_PREFIX: &str = "x-sencillo-";

#[derive(Debug, thiserror::Error)]
pub enum QueryHeaderError {
    #[error("query string is not valid header text")]
    NotText,
    #[error("invalid query parameter name: {0:?}")]
    InvalidName(String),
    #[error("invalid value for query parameter {0:?}")]
    InvalidValue(String),
}

impl From<QueryHeaderError> for ClientError {
    fn from(err: QueryHeaderError) -> Self {
        ClientError::new(err, 400)
    }
}

/// Expands the bridge query header into normalized headers.
///
/// A parameter's values replace any header already present under its
/// normalized name. Requests without the bridge header are left untouched.
///
/// # Errors
///
/// Fails when a parameter name or value cannot be represented as a header.
/// Headers are only modified when every parameter is valid.
pub fn build_query_headers(headers: &mut HeaderMap) -> Result<(), QueryHeaderError> {
    let Some(raw) = headers.get(BRIDGE_QUERY_HEADER) else {
        return Ok(());
    };
    let raw = raw.to_str().map_err(|_| QueryHeaderError::NotText)?;

    let mut parsed: Vec<(HeaderName, HeaderValue)> = Vec::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let name = HeaderName::from_bytes(format!("{QUERY_HEADER_PREFIX}{key}").as_bytes())
            .map_err(|_| QueryHeaderError::InvalidName(key.to_string()))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| QueryHeaderError::InvalidValue(key.to_string()))?;
        parsed.push((name, value));
    }

    for name in parsed.iter().map(|(name, _)| name) {
        headers.remove(name);
    }
    for (name, value) in parsed {
        headers.append(name, value);
    }
    Ok(())
}

/// All values of a normalized query parameter, in query order.
#[must_use]
pub fn query_header_values<'a>(headers: &'a HeaderMap, key: &str) -> Vec<&'a str> {
    let name = format!("{QUERY_HEADER_PREFIX}{key}");
    headers
        .get_all(name.to_ascii_lowercase().as_str())
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_query(query: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(BRIDGE_QUERY_HEADER, HeaderValue::from_str(query).unwrap());
        headers
    }

    #[test]
    fn parameters_become_headers() {
        let mut headers = with_query("limit=10&tag=a&tag=b%20c");
        build_query_headers(&mut headers).unwrap();

        assert_eq!(query_header_values(&headers, "limit"), vec!["10"]);
        assert_eq!(query_header_values(&headers, "tag"), vec!["a", "b c"]);
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut headers = with_query("PageSize=5");
        build_query_headers(&mut headers).unwrap();

        assert_eq!(query_header_values(&headers, "pagesize"), vec!["5"]);
        assert_eq!(query_header_values(&headers, "PageSize"), vec!["5"]);
    }

    #[test]
    fn bridge_values_replace_existing_headers() {
        let mut headers = with_query("limit=10");
        headers.insert("x-sencillo-limit", HeaderValue::from_static("999"));
        build_query_headers(&mut headers).unwrap();

        assert_eq!(query_header_values(&headers, "limit"), vec!["10"]);
    }

    #[test]
    fn missing_bridge_header_is_a_no_op() {
        let mut headers = HeaderMap::new();
        headers.insert("x-other", HeaderValue::from_static("1"));
        build_query_headers(&mut headers).unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn invalid_names_are_rejected_without_partial_writes() {
        let mut headers = with_query("ok=1&bad%20name=2");
        let err = build_query_headers(&mut headers).unwrap_err();

        assert!(matches!(err, QueryHeaderError::InvalidName(ref n) if n == "bad name"));
        assert!(query_header_values(&headers, "ok").is_empty());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut headers = with_query("note=line%0Abreak");
        let err = build_query_headers(&mut headers).unwrap_err();
        assert!(matches!(err, QueryHeaderError::InvalidValue(ref n) if n == "note"));
    }

    #[test]
    fn query_errors_are_400s() {
        use sencillo_core::ClientFacing;
        let err = ClientError::from(QueryHeaderError::InvalidName("x y".to_string()));
        assert_eq!(err.code(), 400);
    }
}
