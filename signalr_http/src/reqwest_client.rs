//! [`reqwest`]-backed implementation of [`HttpClient`].

use core::time::Duration;

use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture};
use signalr_core::http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, HttpStream, Method,
};

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new reqwest-backed HTTP client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing [`reqwest::Client`].
    #[must_use]
    pub const fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    /// Create a client that gives up on connecting after `timeout`.
    #[must_use]
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .connect_timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn prepare(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.inner.request(method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method == Method::Post {
            builder = builder.body(request.body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        let builder = self.prepare(request);

        async move {
            let resp = builder.send().await.map_err(http_error)?;
            let status = resp.status().as_u16();

            let headers: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_lowercase(), v.to_string()))
                })
                .collect();

            let body = resp.bytes().await.map_err(http_error)?.to_vec();

            Ok(HttpResponse {
                status,
                body,
                headers,
            })
        }
        .boxed()
    }

    fn stream(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>> {
        let builder = self.prepare(request);

        async move {
            let resp = builder.send().await.map_err(http_error)?;
            let status = resp.status().as_u16();
            let body = resp.bytes_stream().map_err(http_error).boxed();
            Ok(HttpStream { status, body })
        }
        .boxed()
    }
}

fn http_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::TimedOut
    } else if err.is_body() || err.is_decode() {
        HttpError::Body(err.to_string())
    } else {
        HttpError::Request(err.to_string())
    }
}
