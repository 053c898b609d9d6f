//! Generic HTTP client trait.
//!
//! Negotiation, Server-Sent Events, and long polling only need a handful of
//! request shapes. This trait exposes exactly those so the transports can run
//! over `reqwest` in production and over scripted clients in tests.

use alloc::{string::String, vec::Vec};
use core::time::Duration;

use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use url::Url;

use crate::transport::TransferFormat;

/// Content type of text-format message bodies.
pub const TEXT_CONTENT_TYPE: &str = "application/vnd.microsoft.aspnetcore.endpoint-messages.v1+text";

/// Content type of binary-format message bodies.
pub const BINARY_CONTENT_TYPE: &str =
    "application/vnd.microsoft.aspnetcore.endpoint-messages.v1+binary";

/// The content type for a transfer format.
#[must_use]
pub const fn content_type(format: TransferFormat) -> &'static str {
    match format {
        TransferFormat::Text => TEXT_CONTENT_TYPE,
        TransferFormat::Binary => BINARY_CONTENT_TYPE,
    }
}

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,

    /// `POST`
    Post,

    /// `DELETE`
    Delete,
}

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// The request method.
    pub method: Method,

    /// The target URL.
    pub url: Url,

    /// Request headers.
    pub headers: Vec<(String, String)>,

    /// The request body.
    pub body: Vec<u8>,

    /// Per-request timeout, if any.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
            timeout: None,
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// A `POST` request with a body.
    #[must_use]
    pub fn post(url: Url, body: Vec<u8>) -> Self {
        Self {
            body,
            ..Self::new(Method::Post, url)
        }
    }

    /// A `DELETE` request.
    #[must_use]
    pub fn delete(url: Url) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add several headers.
    #[must_use]
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }

    /// Add an `Authorization: Bearer` header if a token is given.
    #[must_use]
    pub fn with_bearer(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.with_header("Authorization", format!("Bearer {token}")),
            None => self,
        }
    }

    /// Set a timeout for this request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Look up a request header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,

    /// The response body bytes.
    pub body: Vec<u8>,

    /// Selected response headers (lowercase keys).
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    /// A response with no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    /// Look up a response header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k == &lower)
            .map(|(_, v)| v.as_str())
    }

    /// The body decoded as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is still arriving.
pub struct HttpStream {
    /// The HTTP status code.
    pub status: u16,

    /// The body chunks.
    pub body: BoxStream<'static, Result<Bytes, HttpError>>,
}

impl core::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// HTTP-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The request exceeded its timeout.
    #[error("request timed out")]
    TimedOut,

    /// The request could not be completed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// The response body could not be read.
    #[error("error reading response body: {0}")]
    Body(String),
}

/// A minimal async HTTP client.
///
/// Implementations handle the mechanics (TLS, connection pooling) while this
/// trait exposes only what the transports need.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// Send a request and read the whole response.
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>>;

    /// Send a request and return as soon as the response headers arrive.
    fn stream(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>>;
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("http://localhost/hub").expect("valid url")
    }

    #[test]
    fn bearer_header_is_added_when_token_present() {
        let request = HttpRequest::get(url()).with_bearer(Some("abc"));
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
    }

    #[test]
    fn bearer_header_is_skipped_without_token() {
        let request = HttpRequest::get(url()).with_bearer(None);
        assert!(request.headers.is_empty());
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let mut response = HttpResponse::new(200, "ok");
        response
            .headers
            .push(("content-type".into(), TEXT_CONTENT_TYPE.into()));
        assert_eq!(response.header("Content-Type"), Some(TEXT_CONTENT_TYPE));
    }

    #[test]
    fn content_types_match_format() {
        assert!(content_type(TransferFormat::Text).ends_with("+text"));
        assert!(content_type(TransferFormat::Binary).ends_with("+binary"));
    }
}
