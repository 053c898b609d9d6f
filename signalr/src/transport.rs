//! The closed set of native transports.

use futures::future::BoxFuture;
use signalr_core::{
    TransferFormat, Transport, TransportError, TransportType,
    http_client::HttpClient,
    transport::{
        TransportSink,
        factory::{BuildError, TransportBuilder, TransportOptions},
    },
};
use signalr_http::{
    LongPollingConfig, LongPollingTransport, ReqwestHttpClient, ServerSentEventsTransport,
};
use signalr_websocket::WebSocketTransport;
use url::Url;

/// One of the three wire transports.
#[derive(Debug)]
pub enum DefaultTransport<H = ReqwestHttpClient> {
    /// Full-duplex WebSocket.
    WebSockets(WebSocketTransport),

    /// Event stream in, `POST`s out.
    ServerSentEvents(ServerSentEventsTransport<H>),

    /// Repeated `GET`s in, `POST`s out.
    LongPolling(LongPollingTransport<H>),
}

impl<H: HttpClient> Transport for DefaultTransport<H> {
    fn transport_type(&self) -> TransportType {
        match self {
            DefaultTransport::WebSockets(t) => t.transport_type(),
            DefaultTransport::ServerSentEvents(t) => t.transport_type(),
            DefaultTransport::LongPolling(t) => t.transport_type(),
        }
    }

    fn connect(
        &self,
        url: Url,
        format: TransferFormat,
        sink: TransportSink,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        match self {
            DefaultTransport::WebSockets(t) => t.connect(url, format, sink),
            DefaultTransport::ServerSentEvents(t) => t.connect(url, format, sink),
            DefaultTransport::LongPolling(t) => t.connect(url, format, sink),
        }
    }

    fn send(&self, data: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>> {
        match self {
            DefaultTransport::WebSockets(t) => t.send(data),
            DefaultTransport::ServerSentEvents(t) => t.send(data),
            DefaultTransport::LongPolling(t) => t.send(data),
        }
    }

    fn stop(&self) {
        match self {
            DefaultTransport::WebSockets(t) => t.stop(),
            DefaultTransport::ServerSentEvents(t) => t.stop(),
            DefaultTransport::LongPolling(t) => t.stop(),
        }
    }
}

/// Builds [`DefaultTransport`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct DefaultTransportBuilder<H = ReqwestHttpClient> {
    http: H,
    long_polling: LongPollingConfig,
}

impl<H: HttpClient> DefaultTransportBuilder<H> {
    /// A builder whose HTTP transports use `http`.
    pub fn new(http: H) -> Self {
        Self {
            http,
            long_polling: LongPollingConfig::default(),
        }
    }

    /// Use `config` for long polling.
    #[must_use]
    pub const fn with_long_polling(mut self, config: LongPollingConfig) -> Self {
        self.long_polling = config;
        self
    }
}

impl Default for DefaultTransportBuilder {
    fn default() -> Self {
        Self::new(ReqwestHttpClient::new())
    }
}

impl<H: HttpClient> TransportBuilder for DefaultTransportBuilder<H> {
    type Transport = DefaultTransport<H>;

    fn build(
        &self,
        transport: TransportType,
        options: &TransportOptions,
    ) -> Result<Self::Transport, BuildError> {
        Ok(match transport {
            TransportType::WebSockets => {
                DefaultTransport::WebSockets(WebSocketTransport::new(options.clone()))
            }
            TransportType::ServerSentEvents => DefaultTransport::ServerSentEvents(
                ServerSentEventsTransport::new(self.http.clone(), options.clone()),
            ),
            TransportType::LongPolling => DefaultTransport::LongPolling(
                LongPollingTransport::with_config(
                    self.http.clone(),
                    options.clone(),
                    self.long_polling,
                ),
            ),
        })
    }
}
