//! # SignalR
//!
//! Client connections to a SignalR endpoint over WebSockets, Server-Sent
//! Events, or long polling, with the transport picked during negotiation.
//!
//! ```no_run
//! use signalr::{ConnectionConfig, HttpConnectionBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let url = url::Url::parse("https://example.com/chat")?;
//! let connection = HttpConnectionBuilder::new(url)
//!     .config(ConnectionConfig::default().with_access_token("token"))
//!     .build();
//!
//! connection.on_close(|err| match err {
//!     Some(err) => tracing::warn!("connection closed: {err}"),
//!     None => tracing::info!("connection closed"),
//! });
//!
//! connection.start(CancellationToken::new()).await?;
//! connection.send(b"{\"protocol\":\"json\",\"version\":1}\x1e".to_vec()).await?;
//! while let Some(data) = connection.recv().await? {
//!     println!("{}", String::from_utf8_lossy(&data));
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod transport;

pub use builder::{HttpConnection, HttpConnectionBuilder};
pub use transport::{DefaultTransport, DefaultTransportBuilder};

pub use signalr_core::{
    Connection, ConnectionConfig, ConnectionError, ConnectionState, Message, MessageKind,
    TransferFormat, Transport, TransportError, TransportType, TransportTypes, handshake,
};
pub use signalr_http::{LongPollingConfig, ReqwestHttpClient};
