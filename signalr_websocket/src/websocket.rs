//! # WebSocket transport for Tokio

use core::{fmt, time::Duration};
use std::sync::Arc;

use async_tungstenite::{
    WebSocketReceiver, WebSocketSender,
    tokio::{ConnectStream, connect_async_with_config},
};
use futures::{FutureExt, StreamExt, future::BoxFuture, lock::Mutex};
use signalr_core::{
    TransferFormat, Transport, TransportError, TransportType,
    transport::{TransportSink, factory::TransportOptions},
};
use tokio_util::sync::CancellationToken;
use tungstenite::{
    Message,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderName, HeaderValue},
    protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
};
use url::Url;

use crate::{
    MAX_MESSAGE_SIZE,
    endpoint::websocket_url,
    error::{close_outcome, transport_error},
};

/// How long to wait for the server to finish the close handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Outbound {
    sender: WebSocketSender<ConnectStream>,
    format: TransferFormat,
}

type SharedOutbound = Arc<Mutex<Option<Outbound>>>;

/// A [`Transport`] over a WebSocket.
///
/// Text connections carry UTF-8 text frames; binary connections carry
/// binary frames. A background task reads frames and hands their payloads
/// to the [`TransportSink`].
pub struct WebSocketTransport {
    options: TransportOptions,
    outbound: SharedOutbound,
    stop: CancellationToken,
}

impl WebSocketTransport {
    /// A transport that will connect with `options`.
    #[must_use]
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            outbound: Arc::new(Mutex::new(None)),
            stop: CancellationToken::new(),
        }
    }

    fn request(&self, url: &Url) -> Result<Request, TransportError> {
        let mut request = url.as_str().into_client_request().map_err(transport_error)?;

        for (name, value) in &self.options.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::WebSocket(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::WebSocket(format!("invalid value for {name}: {e}")))?;
            request.headers_mut().insert(header, value);
        }

        Ok(request)
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
        if self.outbound.lock().await.is_some() {
            return Err(TransportError::WebSocket("already connected".into()));
        }

        let url = websocket_url(&url, self.options.access_token.as_deref())?;
        let request = self.request(&url)?;

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);

        tracing::info!(host = url.host_str(), path = url.path(), "connecting WebSocket");
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = self.stop.cancelled() => return Err(TransportError::Stopped),
            result = connect_async_with_config(request, Some(ws_config)) => {
                result.map_err(transport_error)?
            }
        };
        tracing::debug!(%format, "WebSocket connected");

        let (sender, receiver) = ws_stream.split();
        *self.outbound.lock().await = Some(Outbound { sender, format });

        tokio::spawn(listen(
            receiver,
            self.outbound.clone(),
            sink,
            self.stop.clone(),
        ));
        Ok(())
    }

    async fn write(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Stopped);
        }

        let mut locked = self.outbound.lock().await;
        let outbound = locked.as_mut().ok_or(TransportError::NotConnected)?;

        let message = match outbound.format {
            TransferFormat::Text => Message::Text(String::from_utf8(data).map_err(|e| {
                TransportError::WebSocket(format!("text message is not valid UTF-8: {e}"))
            })?.into()),
            TransferFormat::Binary => Message::Binary(data.into()),
        };

        outbound.sender.send(message).await.map_err(transport_error)
    }
}

impl Transport for WebSocketTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::WebSockets
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
        self.write(data).boxed()
    }

    fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::debug!("stopping WebSocket transport");
            self.stop.cancel();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("headers", &self.options.headers.len())
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Read frames until the socket closes or the transport is stopped, then
/// fire the sink's terminal event.
async fn listen(
    mut receiver: WebSocketReceiver<ConnectStream>,
    outbound: SharedOutbound,
    sink: TransportSink,
    stop: CancellationToken,
) {
    let outcome = loop {
        let next = tokio::select! {
            biased;
            () = stop.cancelled() => break close(&outbound, &mut receiver).await,
            next = receiver.next() => next,
        };

        let data = match next {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "server closed the WebSocket");
                let outcome = close_outcome(frame);
                drain(&mut receiver).await;
                break outcome;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Err(err)) => {
                tracing::warn!("error reading from WebSocket: {err}");
                break Some(transport_error(err));
            }
            None => break Some(TransportError::WebSocketDropped),
        };

        tokio::select! {
            biased;
            () = stop.cancelled() => break close(&outbound, &mut receiver).await,
            delivered = sink.on_received(data) => {
                if delivered.is_err() {
                    tracing::debug!("transport events dropped; closing WebSocket");
                    break close(&outbound, &mut receiver).await;
                }
            }
        }
    };

    stop.cancel();
    outbound.lock().await.take();
    sink.on_closed(outcome);
}

/// Send a normal close frame and wait briefly for the server's reply.
async fn close(
    outbound: &Mutex<Option<Outbound>>,
    receiver: &mut WebSocketReceiver<ConnectStream>,
) -> Option<TransportError> {
    if let Some(outbound) = outbound.lock().await.as_mut() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(err) = outbound.sender.close(Some(frame)).await {
            tracing::debug!("failed to send close frame: {err}");
            return None;
        }
    }

    drain(receiver).await;
    None
}

async fn drain(receiver: &mut WebSocketReceiver<ConnectStream>) {
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(Ok(message)) = receiver.next().await {
            if message.is_close() {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::debug!("server did not finish the close handshake in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signalr_core::transport::events;
    use testresult::TestResult;

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let transport = WebSocketTransport::new(TransportOptions::default());
        assert!(matches!(
            transport.send(b"hi".to_vec()).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_after_stop_fails() -> TestResult {
        let transport = WebSocketTransport::new(TransportOptions::default());
        transport.stop();

        let (sink, _events) = events(4);
        let result = transport
            .connect(Url::parse("http://127.0.0.1:1/hub")?, TransferFormat::Text, sink)
            .await;
        assert!(matches!(result, Err(TransportError::Stopped)));
        Ok(())
    }

    #[tokio::test]
    async fn bad_header_name_is_rejected() -> TestResult {
        let options = TransportOptions {
            access_token: None,
            headers: vec![("bad header".into(), "x".into())],
        };
        let transport = WebSocketTransport::new(options);
        let result = transport.request(&Url::parse("ws://127.0.0.1:1/hub")?);
        assert!(matches!(result, Err(TransportError::WebSocket(_))));
        Ok(())
    }

    #[test]
    fn is_a_websocket_transport() {
        let transport = WebSocketTransport::new(TransportOptions::default());
        assert_eq!(transport.transport_type(), TransportType::WebSockets);
    }
}
