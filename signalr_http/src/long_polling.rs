//! Long-polling transport.
//!
//! The server holds each `GET` open until it has data or the poll times out:
//!
//! | Poll result         | Action                                        |
//! |---------------------|-----------------------------------------------|
//! | `200`               | deliver every framed message in the body, re-poll |
//! | `204`               | the server ended the connection; close cleanly |
//! | other status        | close with the status and body                |
//! | client-side timeout | re-poll                                       |
//! | request error       | close with the error                          |
//!
//! Bodies use the text or binary length-prefixed framing, matching the
//! transfer format. Each `send` is a single `POST` carrying one framed
//! message.

use core::time::Duration;
use std::sync::OnceLock;

use futures::{FutureExt, future::BoxFuture};
use signalr_core::{
    TransferFormat, Transport, TransportError, TransportType,
    framing::{FormatError, binary, text},
    http_client::{HttpClient, HttpError, HttpRequest, HttpResponse},
    transport::{TransportSink, factory::TransportOptions},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::outbound::{post_message, with_cache_buster};

/// Default time a single poll may stay open.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(90);

/// Default limit on the `DELETE` sent when stopping.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongPollingConfig {
    /// How long a single poll may stay open before it is re-issued.
    pub poll_timeout: Duration,

    /// Limit on the best-effort `DELETE` sent when stopping.
    pub delete_timeout: Duration,
}

impl Default for LongPollingConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

impl LongPollingConfig {
    /// Set the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: Url,
    format: TransferFormat,
}

/// A [`Transport`] built on repeated `GET` requests.
#[derive(Debug)]
pub struct LongPollingTransport<H> {
    http: H,
    options: TransportOptions,
    config: LongPollingConfig,
    endpoint: OnceLock<Endpoint>,
    stop: CancellationToken,
}

impl<H: HttpClient> LongPollingTransport<H> {
    /// A transport issuing requests through `http` with default settings.
    pub fn new(http: H, options: TransportOptions) -> Self {
        Self::with_config(http, options, LongPollingConfig::default())
    }

    /// A transport with explicit polling settings.
    pub fn with_config(http: H, options: TransportOptions, config: LongPollingConfig) -> Self {
        Self {
            http,
            options,
            config,
            endpoint: OnceLock::new(),
            stop: CancellationToken::new(),
        }
    }

    async fn open(
        &self,
        url: Url,
        format: TransferFormat,
        sink: TransportSink,
    ) -> Result<(), TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        if self.endpoint.get().is_some() {
            return Err(TransportError::InvalidUrl("already connected".into()));
        }

        let poller = Poller {
            http: self.http.clone(),
            options: self.options.clone(),
            config: self.config,
            endpoint: Endpoint { url, format },
        };

        tracing::debug!(
            host = poller.endpoint.url.host_str(),
            path = poller.endpoint.url.path(),
            %format,
            "starting long polling"
        );

        // The first poll settles `connect`; failures after it go to the sink.
        let first = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Err(TransportError::Stopped),
            first = poller.poll() => first,
        };
        let first = match first {
            Ok(response) if matches!(response.status, 200 | 204) => Some(response),
            Ok(response) => {
                return Err(TransportError::UnexpectedStatus {
                    status: response.status,
                    body: response.body_text(),
                });
            }
            Err(HttpError::TimedOut) => None,
            Err(err) => return Err(err.into()),
        };

        self.endpoint
            .set(poller.endpoint.clone())
            .map_err(|_| TransportError::InvalidUrl("already connected".into()))?;

        tokio::spawn(poller.run(first, sink, self.stop.clone()));
        Ok(())
    }

    async fn post(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        let endpoint = self.endpoint.get().ok_or(TransportError::NotConnected)?;

        let body = match endpoint.format {
            TransferFormat::Text => text::encode(&data)?,
            TransferFormat::Binary => binary::encode(&data)?,
        };
        post_message(&self.http, &endpoint.url, endpoint.format, &self.options, body).await
    }
}

impl<H: HttpClient> Transport for LongPollingTransport<H> {
    fn transport_type(&self) -> TransportType {
        TransportType::LongPolling
    }

    fn connect(
        &self,
        url: Url,
        format: TransferFormat,
        sink: TransportSink,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        self.open(url, format, sink).boxed()
    }

    fn send(&self, data: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        self.post(data).boxed()
    }

    fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::debug!("stopping long polling");
            self.stop.cancel();
        }
    }
}

impl<H> Drop for LongPollingTransport<H> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Owns everything the background poll loop needs.
struct Poller<H> {
    http: H,
    options: TransportOptions,
    config: LongPollingConfig,
    endpoint: Endpoint,
}

impl<H: HttpClient> Poller<H> {
    async fn poll(&self) -> Result<HttpResponse, HttpError> {
        let request = HttpRequest::get(with_cache_buster(&self.endpoint.url))
            .with_headers(&self.options.headers)
            .with_bearer(self.options.access_token.as_deref())
            .with_timeout(self.config.poll_timeout);
        self.http.send(request).await
    }

    async fn run(self, first: Option<HttpResponse>, sink: TransportSink, stop: CancellationToken) {
        let mut pending = first;

        let outcome = loop {
            let response = match pending.take() {
                Some(response) => response,
                None => {
                    let polled = tokio::select! {
                        biased;
                        () = stop.cancelled() => break self.delete().await,
                        polled = self.poll() => polled,
                    };
                    match polled {
                        Ok(response) => response,
                        Err(HttpError::TimedOut) => {
                            tracing::trace!("poll timed out; polling again");
                            continue;
                        }
                        Err(err) => {
                            tracing::warn!("poll failed: {err}");
                            break Some(TransportError::Http(err));
                        }
                    }
                }
            };

            match response.status {
                200 => {}
                204 => {
                    tracing::debug!("server ended the long polling connection");
                    break None;
                }
                status => {
                    tracing::warn!(status, "unexpected poll response");
                    break Some(TransportError::UnexpectedStatus {
                        status,
                        body: response.body_text(),
                    });
                }
            }

            let messages = match self.decode(&response.body) {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::warn!("malformed poll response: {err}");
                    break Some(TransportError::Format(err));
                }
            };

            let mut detached = false;
            for message in messages {
                let delivered = tokio::select! {
                    biased;
                    () = stop.cancelled() => false,
                    delivered = sink.on_received(message) => delivered.is_ok(),
                };
                if !delivered {
                    detached = true;
                    break;
                }
            }
            if detached {
                break self.delete().await;
            }
        };

        stop.cancel();
        sink.on_closed(outcome);
    }

    fn decode(&self, body: &[u8]) -> Result<Vec<Vec<u8>>, FormatError> {
        let (messages, consumed) = match self.endpoint.format {
            TransferFormat::Text => text::parse_all(body)?,
            TransferFormat::Binary => binary::parse_all(body)?,
        };
        if consumed < body.len() {
            return Err(FormatError::Truncated {
                remaining: body.len() - consumed,
            });
        }
        Ok(messages)
    }

    /// Tell the server the client is leaving. Failures only get logged.
    async fn delete(&self) -> Option<TransportError> {
        let request = HttpRequest::delete(self.endpoint.url.clone())
            .with_headers(&self.options.headers)
            .with_bearer(self.options.access_token.as_deref())
            .with_timeout(self.config.delete_timeout);

        match self.http.send(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                tracing::debug!("long polling connection deleted");
            }
            Ok(response) => tracing::debug!(status = response.status, "DELETE rejected"),
            Err(err) => tracing::debug!("DELETE failed: {err}"),
        }
        None
    }
}
