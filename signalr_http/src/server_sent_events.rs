//! Server-Sent Events transport.
//!
//! ```text
//! GET  {url}&access_token=…   Accept: text/event-stream   ──► held open, server → client
//! POST {url}                  one message per request     ──► client → server
//! ```
//!
//! The event stream is decoded with [`SseDecoder`]. SSE is a text channel,
//! so the binary transfer format is refused at connect.
//!
//! Failures before the stream opens reject `connect` and never reach the
//! sink. Once open, the sink's terminal event reports how the stream ended.

use std::{io, sync::OnceLock};

use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture};
use signalr_core::{
    MessageKind, TransferFormat, Transport, TransportError, TransportType,
    framing::{CodecError, sse::SseDecoder},
    http_client::{HttpClient, HttpError, HttpRequest, HttpStream},
    transport::{TransportSink, factory::TransportOptions},
};
use tokio_util::{codec::FramedRead, io::StreamReader, sync::CancellationToken};
use url::Url;

use crate::outbound::{post_message, with_access_token};

/// `Accept` value for the event stream request.
pub const EVENT_STREAM: &str = "text/event-stream";

/// A [`Transport`] that receives over an SSE stream and sends with `POST`s.
#[derive(Debug)]
pub struct ServerSentEventsTransport<H> {
    http: H,
    options: TransportOptions,
    url: OnceLock<Url>,
    stop: CancellationToken,
}

impl<H: HttpClient> ServerSentEventsTransport<H> {
    /// A transport issuing requests through `http`.
    pub fn new(http: H, options: TransportOptions) -> Self {
        Self {
            http,
            options,
            url: OnceLock::new(),
            stop: CancellationToken::new(),
        }
    }

    async fn open(
        &self,
        url: Url,
        format: TransferFormat,
        sink: TransportSink,
    ) -> Result<(), TransportError> {
        if format == TransferFormat::Binary {
            return Err(TransportError::UnsupportedFormat(format));
        }
        if self.stop.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        if self.url.get().is_some() {
            return Err(TransportError::InvalidUrl("already connected".into()));
        }

        let request = HttpRequest::get(with_access_token(&url, self.options.access_token.as_deref()))
            .with_header("Accept", EVENT_STREAM)
            .with_headers(&self.options.headers);

        tracing::debug!(host = url.host_str(), path = url.path(), "opening event stream");
        let response = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Err(TransportError::Stopped),
            response = self.http.stream(request) => response?,
        };

        if response.status != 200 {
            let status = response.status;
            let body = collect_body(response).await;
            tracing::warn!(status, "event stream rejected");
            return Err(TransportError::UnexpectedStatus { status, body });
        }

        self.url
            .set(url)
            .map_err(|_| TransportError::InvalidUrl("already connected".into()))?;

        tokio::spawn(read_events(response, sink, self.stop.clone()));
        Ok(())
    }

    async fn post(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Stopped);
        }
        let url = self.url.get().ok_or(TransportError::NotConnected)?;
        post_message(&self.http, url, TransferFormat::Text, &self.options, data).await
    }
}

impl<H: HttpClient> Transport for ServerSentEventsTransport<H> {
    fn transport_type(&self) -> TransportType {
        TransportType::ServerSentEvents
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
            tracing::debug!("stopping SSE transport");
            self.stop.cancel();
        }
    }
}

impl<H> Drop for ServerSentEventsTransport<H> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn read_events(response: HttpStream, sink: TransportSink, stop: CancellationToken) {
    let reader = StreamReader::new(response.body.map_err(io::Error::other));
    let mut events = FramedRead::new(reader, SseDecoder::new());

    let outcome = loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break None,
            next = events.next() => next,
        };

        let message = match next {
            None => {
                tracing::debug!("event stream ended");
                break None;
            }
            Some(Ok(message)) => message,
            Some(Err(CodecError::Format(err))) => {
                tracing::warn!("malformed event stream: {err}");
                break Some(TransportError::Format(err));
            }
            Some(Err(CodecError::Io(err))) => {
                tracing::warn!("event stream failed: {err}");
                break Some(TransportError::Http(HttpError::Body(err.to_string())));
            }
        };

        let data = match message.kind() {
            MessageKind::Text | MessageKind::Binary => message.into_payload(),
            MessageKind::Close => break None,
            MessageKind::Error => {
                let reason = String::from_utf8_lossy(message.payload()).into_owned();
                break Some(TransportError::ServerError(reason));
            }
        };

        tokio::select! {
            biased;
            () = stop.cancelled() => break None,
            delivered = sink.on_received(data) => {
                if delivered.is_err() {
                    break None;
                }
            }
        }
    };

    stop.cancel();
    sink.on_closed(outcome);
}

async fn collect_body(response: HttpStream) -> String {
    let bytes = response
        .body
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
