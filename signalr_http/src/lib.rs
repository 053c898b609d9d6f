//! # SignalR HTTP transports
//!
//! The two transports that ride on plain HTTP requests:
//!
//! | Transport                          | Server → client               | Client → server      |
//! |------------------------------------|-------------------------------|----------------------|
//! | [`ServerSentEventsTransport`]      | one long-lived `GET` stream   | one `POST` per message |
//! | [`LongPollingTransport`]           | repeated `GET`s held open     | one `POST` per message |
//!
//! Both are generic over [`HttpClient`](signalr_core::http_client::HttpClient);
//! [`ReqwestHttpClient`] is the native implementation.

pub mod long_polling;
pub mod reqwest_client;
pub mod server_sent_events;

mod outbound;

pub use long_polling::{LongPollingConfig, LongPollingTransport};
pub use reqwest_client::ReqwestHttpClient;
pub use server_sent_events::ServerSentEventsTransport;
