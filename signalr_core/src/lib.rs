//! # SignalR Core
//!
//! The I/O-agnostic core of a SignalR client connection: message framing,
//! negotiation, transport selection, the duplex connection context with its
//! shutdown protocol, and the client-facing [`Connection`].
//!
//! Concrete wire transports live in `signalr_websocket` and `signalr_http`.
//! They plug in through the [`Transport`](transport::Transport) and
//! [`HttpClient`](http_client::HttpClient) traits.

extern crate alloc;

pub mod ack;
pub mod backoff;
pub mod connection;
pub mod context;
pub mod framing;
pub mod handshake;
pub mod http_client;
pub mod message;
pub mod negotiate;
pub mod pipe;
pub mod timeout;
pub mod transport;

pub use connection::{Connection, ConnectionError, ConnectionState, config::ConnectionConfig};
pub use message::{Message, MessageKind};
pub use transport::{TransferFormat, Transport, TransportError, TransportType, TransportTypes};
