//! # SignalR WebSocket transport
//!
//! A [`Transport`](signalr_core::Transport) over a full-duplex WebSocket,
//! built on [`async_tungstenite`] for Tokio.

pub mod error;
pub mod endpoint;
pub mod websocket;

pub use websocket::WebSocketTransport;

/// Largest inbound message accepted, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;
