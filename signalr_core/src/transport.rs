//! The uniform transport contract.
//!
//! Every wire transport (WebSockets, Server-Sent Events, long polling)
//! presents the same surface:
//!
//! ```text
//!            connect / send / stop
//! Connection ─────────────────────────► Transport
//!     ▲                                     │
//!     │  TransportEvents   ◄── TransportSink┘
//!     │   received: bounded channel of payloads
//!     └── closed:   fires at most once, with the reason
//! ```
//!
//! A transport reports delivered payloads through [`TransportSink::on_received`]
//! and its terminal event through [`TransportSink::on_closed`]. It retries
//! nothing; retry policy belongs to the connection.

pub mod factory;

use alloc::{string::String, sync::Arc, vec::Vec};
use core::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::{framing::FormatError, http_client::HttpError};

/// A concrete byte-delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportType {
    /// Full-duplex WebSocket.
    WebSockets,

    /// Server-to-client event stream with `POST` for sending.
    ServerSentEvents,

    /// Repeated `GET` requests held open by the server.
    LongPolling,
}

impl TransportType {
    /// All transports in selection priority order.
    pub const PRIORITY: [TransportType; 3] = [
        TransportType::WebSockets,
        TransportType::ServerSentEvents,
        TransportType::LongPolling,
    ];

    const fn bit(self) -> u8 {
        match self {
            TransportType::WebSockets => 0b001,
            TransportType::ServerSentEvents => 0b010,
            TransportType::LongPolling => 0b100,
        }
    }

    /// The name used in negotiate documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TransportType::WebSockets => "WebSockets",
            TransportType::ServerSentEvents => "ServerSentEvents",
            TransportType::LongPolling => "LongPolling",
        }
    }

    /// Look up a transport by its negotiate name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unrecognized transport or transfer format name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown name: {0}")]
pub struct UnknownName(pub String);

impl FromStr for TransportType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRIORITY
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName(s.into()))
    }
}

/// A set of [`TransportType`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransportTypes(u8);

impl TransportTypes {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// Only WebSockets.
    pub const WEB_SOCKETS: Self = Self(TransportType::WebSockets.bit());

    /// Only Server-Sent Events.
    pub const SERVER_SENT_EVENTS: Self = Self(TransportType::ServerSentEvents.bit());

    /// Only long polling.
    pub const LONG_POLLING: Self = Self(TransportType::LongPolling.bit());

    /// Every transport.
    pub const ALL: Self = Self(0b111);

    /// Whether `transport` is in the set.
    #[must_use]
    pub const fn contains(self, transport: TransportType) -> bool {
        self.0 & transport.bit() != 0
    }

    /// The set with `transport` added.
    #[must_use]
    pub const fn with(self, transport: TransportType) -> Self {
        Self(self.0 | transport.bit())
    }

    /// The set with `transport` removed.
    #[must_use]
    pub const fn without(self, transport: TransportType) -> Self {
        Self(self.0 & !transport.bit())
    }

    /// Transports in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in priority order.
    pub fn iter(self) -> impl Iterator<Item = TransportType> {
        TransportType::PRIORITY
            .into_iter()
            .filter(move |t| self.contains(*t))
    }
}

impl From<TransportType> for TransportTypes {
    fn from(transport: TransportType) -> Self {
        Self(transport.bit())
    }
}

impl FromIterator<TransportType> for TransportTypes {
    fn from_iter<I: IntoIterator<Item = TransportType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl core::ops::BitOr for TransportTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for TransportTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The encoding a transport carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferFormat {
    /// UTF-8 text.
    Text,

    /// Arbitrary bytes.
    Binary,
}

impl TransferFormat {
    const fn bit(self) -> u8 {
        match self {
            TransferFormat::Text => 0b01,
            TransferFormat::Binary => 0b10,
        }
    }

    /// The name used in negotiate documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TransferFormat::Text => "Text",
            TransferFormat::Binary => "Binary",
        }
    }

    /// Look up a format by its negotiate name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [TransferFormat::Text, TransferFormat::Binary]
            .into_iter()
            .find(|f| f.name() == name)
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TransferFormat {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [TransferFormat::Text, TransferFormat::Binary]
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName(s.into()))
    }
}

/// A set of [`TransferFormat`]s.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransferFormats(u8);

impl TransferFormats {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// Text only.
    pub const TEXT: Self = Self(TransferFormat::Text.bit());

    /// Binary only.
    pub const BINARY: Self = Self(TransferFormat::Binary.bit());

    /// Text and binary.
    pub const ALL: Self = Self(0b11);

    /// Whether `format` is in the set.
    #[must_use]
    pub const fn contains(self, format: TransferFormat) -> bool {
        self.0 & format.bit() != 0
    }

    /// The set with `format` added.
    #[must_use]
    pub const fn with(self, format: TransferFormat) -> Self {
        Self(self.0 | format.bit())
    }

    /// Members, text first.
    pub fn iter(self) -> impl Iterator<Item = TransferFormat> {
        [TransferFormat::Text, TransferFormat::Binary]
            .into_iter()
            .filter(move |f| self.contains(*f))
    }
}

impl FromIterator<TransferFormat> for TransferFormats {
    fn from_iter<I: IntoIterator<Item = TransferFormat>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

impl fmt::Debug for TransferFormats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Network-level failure reported by a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The HTTP request itself failed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The server answered with an unexpected status.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,

        /// The response body, lossily decoded.
        body: String,
    },

    /// The WebSocket closed with a non-normal status.
    #[error("websocket closed with status code {code} ({reason})")]
    WebSocketClosed {
        /// The close code.
        code: u16,

        /// The close reason.
        reason: String,
    },

    /// The WebSocket ended without a close handshake.
    #[error("websocket closed without a close frame")]
    WebSocketDropped,

    /// The WebSocket layer failed.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The server sent an error message in-band.
    #[error("server reported an error: {0}")]
    ServerError(String),

    /// Received data could not be parsed.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The transport cannot carry the requested format.
    #[error("transport does not support the {0} transfer format")]
    UnsupportedFormat(TransferFormat),

    /// `send` was called before `connect` succeeded.
    #[error("cannot send until the transport is connected")]
    NotConnected,

    /// The transport has been stopped.
    #[error("transport stopped")]
    Stopped,

    /// The URL could not be used by this transport.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// The connection stopped listening for transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport events receiver dropped")]
pub struct EventsClosed;

/// The transport-facing half of a transport's event channel.
#[derive(Debug, Clone)]
pub struct TransportSink {
    received: async_channel::Sender<Vec<u8>>,
    closed: async_channel::Sender<Option<TransportError>>,
    fired: Arc<AtomicBool>,
}

impl TransportSink {
    /// Deliver one payload.
    ///
    /// Waits while the connection is not keeping up.
    ///
    /// # Errors
    ///
    /// Returns [`EventsClosed`] once the transport has closed or the
    /// connection has dropped its [`TransportEvents`].
    pub async fn on_received(&self, data: Vec<u8>) -> Result<(), EventsClosed> {
        self.received.send(data).await.map_err(|_| EventsClosed)
    }

    /// Report the terminal event.
    ///
    /// Only the first call has any effect; it returns `true`. Payloads
    /// delivered before this call remain readable.
    pub fn on_closed(&self, error: Option<TransportError>) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        match &error {
            Some(err) => tracing::debug!("transport closed with error: {err}"),
            None => tracing::debug!("transport closed"),
        }

        self.received.close();
        // Capacity 1 and only the first caller gets here.
        let _ = self.closed.try_send(error);
        self.closed.close();
        true
    }

    /// Whether [`on_closed`](Self::on_closed) has fired.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// The connection-facing half of a transport's event channel.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    received: async_channel::Receiver<Vec<u8>>,
    closed: async_channel::Receiver<Option<TransportError>>,
}

impl TransportEvents {
    /// The next payload, or `None` once the transport has closed and every
    /// earlier payload has been read.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.received.recv().await.ok()
    }

    /// Wait for the terminal event and return its error, if any.
    ///
    /// A sink dropped without firing reports [`TransportError::Stopped`].
    pub async fn closed(&self) -> Option<TransportError> {
        self.closed
            .recv()
            .await
            .unwrap_or(Some(TransportError::Stopped))
    }
}

/// Create a transport event channel buffering up to `capacity` payloads.
#[must_use]
pub fn events(capacity: usize) -> (TransportSink, TransportEvents) {
    let (received_tx, received_rx) = async_channel::bounded(capacity.max(1));
    let (closed_tx, closed_rx) = async_channel::bounded(1);
    (
        TransportSink {
            received: received_tx,
            closed: closed_tx,
            fired: Arc::new(AtomicBool::new(false)),
        },
        TransportEvents {
            received: received_rx,
            closed: closed_rx,
        },
    )
}

/// A wire transport.
///
/// `stop` is idempotent and never blocks; the transport finishes closing in
/// the background and then fires [`TransportSink::on_closed`].
pub trait Transport: Send + Sync + 'static {
    /// Which transport this is.
    fn transport_type(&self) -> TransportType;

    /// Open the transport.
    ///
    /// Resolves once data can flow. An immediate failure is returned here
    /// rather than reported through the sink.
    fn connect(
        &self,
        url: Url,
        format: TransferFormat,
        sink: TransportSink,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Send one message.
    fn send(&self, data: Vec<u8>) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Begin closing.
    fn stop(&self);
}
