//! Wire-level messages.
//!
//! A [`Message`] is a discrete unit of application data produced by one of
//! the [`framing`](crate::framing) codecs. Its [`MessageKind`] is the
//! framing tag, which is unrelated to any hub-level message type.

use alloc::vec::Vec;

/// The framing tag carried alongside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 application text.
    Text,

    /// Opaque application bytes.
    Binary,

    /// The remote side is closing the connection.
    Close,

    /// The remote side reports an error.
    Error,
}

impl MessageKind {
    /// The single-byte marker used by the typed text and SSE formats.
    #[must_use]
    pub const fn marker(self) -> u8 {
        match self {
            MessageKind::Text => b'T',
            MessageKind::Binary => b'B',
            MessageKind::Close => b'C',
            MessageKind::Error => b'E',
        }
    }

    /// Look up a kind by its marker byte.
    #[must_use]
    pub const fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'T' => Some(MessageKind::Text),
            b'B' => Some(MessageKind::Binary),
            b'C' => Some(MessageKind::Close),
            b'E' => Some(MessageKind::Error),
            _ => None,
        }
    }
}

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl Message {
    /// Create a message of the given kind.
    #[must_use]
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Create a [`MessageKind::Text`] message.
    #[must_use]
    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Text, payload)
    }

    /// Create a [`MessageKind::Binary`] message.
    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    /// Create a [`MessageKind::Close`] message.
    #[must_use]
    pub fn close(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Close, payload)
    }

    /// Create a [`MessageKind::Error`] message.
    #[must_use]
    pub fn error(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Error, payload)
    }

    /// The framing tag.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_round_trip() {
        for kind in [
            MessageKind::Text,
            MessageKind::Binary,
            MessageKind::Close,
            MessageKind::Error,
        ] {
            assert_eq!(MessageKind::from_marker(kind.marker()), Some(kind));
        }
    }

    #[test]
    fn unknown_marker_is_none() {
        assert_eq!(MessageKind::from_marker(b'X'), None);
        assert_eq!(MessageKind::from_marker(b't'), None);
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Message::close("bye").kind(), MessageKind::Close);
        assert_eq!(Message::error("boom").payload(), b"boom");
    }
}
