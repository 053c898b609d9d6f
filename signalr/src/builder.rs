//! Assembling a ready-to-start [`Connection`].

use std::sync::Arc;

use signalr_core::{
    Connection, ConnectionConfig,
    transport::factory::{TransportFactory, WebSocketSupport},
};
use signalr_http::{LongPollingConfig, ReqwestHttpClient};
use url::Url;

use crate::transport::DefaultTransportBuilder;

/// A [`Connection`] using reqwest for HTTP and the native transports.
pub type HttpConnection = Connection<ReqwestHttpClient, DefaultTransportBuilder>;

/// Builder for an [`HttpConnection`].
#[derive(Debug)]
pub struct HttpConnectionBuilder {
    url: Url,
    config: ConnectionConfig,
    http: Option<ReqwestHttpClient>,
    long_polling: LongPollingConfig,
    websocket_support: Option<Arc<WebSocketSupport>>,
}

impl HttpConnectionBuilder {
    /// Start building a connection to the endpoint at `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            config: ConnectionConfig::default(),
            http: None,
            long_polling: LongPollingConfig::default(),
            websocket_support: None,
        }
    }

    /// Use `config` for negotiation, retries, and buffering.
    #[must_use]
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing HTTP client.
    #[must_use]
    pub fn http_client(mut self, http: ReqwestHttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Long-polling settings.
    #[must_use]
    pub const fn long_polling(mut self, config: LongPollingConfig) -> Self {
        self.long_polling = config;
        self
    }

    /// Replace the process-wide WebSocket capability.
    #[must_use]
    pub fn websocket_support(mut self, support: Arc<WebSocketSupport>) -> Self {
        self.websocket_support = Some(support);
        self
    }

    /// Assemble the connection. Nothing is sent until
    /// [`start`](Connection::start).
    #[must_use]
    pub fn build(self) -> HttpConnection {
        let http = self.http.unwrap_or_default();
        let builder = DefaultTransportBuilder::new(http.clone()).with_long_polling(self.long_polling);
        let factory = match self.websocket_support {
            Some(support) => TransportFactory::with_websocket_support(builder, support),
            None => TransportFactory::new(builder),
        };

        tracing::debug!(url = %self.url, transports = ?self.config.transports, "building connection");
        Connection::new(self.url, http, factory, self.config)
    }
}
