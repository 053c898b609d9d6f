//! Mapping WebSocket failures onto [`TransportError`].

use signalr_core::TransportError;
use tungstenite::{
    error::ProtocolError,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Status reported when the server's close frame carries no code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// The terminal outcome of a close frame sent by the server.
///
/// Only a normal closure (1000) is clean.
#[must_use]
pub fn close_outcome(frame: Option<CloseFrame>) -> Option<TransportError> {
    match frame {
        Some(frame) if frame.code == CloseCode::Normal => None,
        Some(frame) => Some(TransportError::WebSocketClosed {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        }),
        None => Some(TransportError::WebSocketClosed {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        }),
    }
}

/// Convert a [`tungstenite::Error`].
///
/// A connection that ends without the close handshake becomes
/// [`TransportError::WebSocketDropped`].
#[must_use]
pub fn transport_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            TransportError::WebSocketDropped
        }
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            TransportError::WebSocketDropped
        }
        tungstenite::Error::Url(url) => TransportError::InvalidUrl(url.to_string()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
