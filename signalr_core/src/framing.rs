//! Message framing codecs.
//!
//! Every parser in this module reports one of three outcomes:
//!
//! | Outcome                              | Meaning                                    |
//! |--------------------------------------|--------------------------------------------|
//! | `Ok(ParseOutcome::Complete { .. })`  | one message parsed, `consumed` bytes used  |
//! | `Ok(ParseOutcome::Incomplete { .. })`| not enough data yet; read more and retry   |
//! | `Err(FormatError)`                   | the input is malformed; the parse is over  |
//!
//! "Incomplete" is never an error. Streaming callers keep the unconsumed
//! remainder and call again once more bytes have arrived.
//!
//! | Strategy                              | Wire shape                        |
//! |---------------------------------------|-----------------------------------|
//! | [`text`]                              | `{length}:{payload};`             |
//! | [`typed_text`]                        | `T` then `{length}:{K}:{payload};`|
//! | [`record_separator`]                  | `{json}\x1e`                      |
//! | [`binary`]                            | `{varint length}{payload}`        |
//! | [`sse`]                               | `data: K\r\ndata: ...\r\n\r\n`    |

pub mod binary;
pub mod record_separator;
pub mod sse;
pub mod text;
pub mod typed_text;

use alloc::string::String;

use thiserror::Error;

/// The result of a successful (non-erroring) parse attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    /// A full message was parsed.
    Complete {
        /// The parsed value.
        value: T,

        /// Bytes consumed from the front of the input, including framing.
        consumed: usize,
    },

    /// More data is required.
    ///
    /// Stateless parsers always report `consumed: 0`. The SSE parser may
    /// consume whole lines into its internal state before the message is
    /// complete.
    Incomplete {
        /// Bytes consumed from the front of the input.
        consumed: usize,
    },
}

impl<T> ParseOutcome<T> {
    /// Bytes consumed from the front of the input.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        match self {
            ParseOutcome::Complete { consumed, .. } | ParseOutcome::Incomplete { consumed } => {
                *consumed
            }
        }
    }

    /// The parsed value, if complete.
    #[must_use]
    pub fn complete(self) -> Option<T> {
        match self {
            ParseOutcome::Complete { value, .. } => Some(value),
            ParseOutcome::Incomplete { .. } => None,
        }
    }

    /// Map the parsed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Complete { value, consumed } => ParseOutcome::Complete {
                value: f(value),
                consumed,
            },
            ParseOutcome::Incomplete { consumed } => ParseOutcome::Incomplete { consumed },
        }
    }
}

/// Malformed wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The length prefix is not a decimal integer.
    #[error("invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// The length prefix is negative.
    #[error("negative length prefix: -{0}")]
    NegativeLength(u64),

    /// The length prefix does not fit in a 32-bit signed integer.
    #[error("length prefix overflows a 32-bit signed integer")]
    LengthOverflow,

    /// The byte after the payload is not the `;` trailer.
    #[error("missing trailer character: expected ';', found {found:?}")]
    MissingTrailer {
        /// The byte that was found instead.
        found: char,
    },

    /// An expected separator byte is missing.
    #[error("expected {expected:?}, found {found:?}")]
    MissingSeparator {
        /// The separator that was expected.
        expected: char,

        /// The byte that was found instead.
        found: char,
    },

    /// The binary length prefix exceeds 2^31 - 1.
    #[error("message too large")]
    MessageTooLarge,

    /// A batch starts with an unknown format indicator.
    #[error("unknown format indicator {0:?}")]
    UnknownFormatIndicator(char),

    /// A message carries an unknown type marker.
    #[error("unknown message type {0:?}")]
    UnknownMessageType(char),

    /// The message type line is empty or longer than one character.
    #[error("expected a single-character message type, found {0:?}")]
    InvalidMessageType(String),

    /// Binary payloads cannot be carried by this text-only format.
    #[error("binary messages are not supported by this format")]
    BinaryUnsupported,

    /// An SSE line does not start with `data: `.
    #[error("expected line to start with 'data: '")]
    MissingDataPrefix,

    /// An SSE line ends with a bare `\n`.
    #[error("expected '\\r\\n' line ending, found bare '\\n'")]
    MissingCarriageReturn,

    /// An SSE message is not terminated by a blank line.
    #[error("expected blank line terminating the message")]
    MissingEndOfMessage,

    /// A complete body ends in the middle of a message.
    #[error("body ends with {remaining} bytes of an incomplete message")]
    Truncated {
        /// Bytes left over after the last complete message.
        remaining: usize,
    },
}

/// Error type for the [`tokio_util::codec`] adapters.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed wire data.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The underlying reader or writer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The byte at `index` rendered for error messages.
pub(crate) fn char_at(buf: &[u8], index: usize) -> char {
    buf.get(index).map_or('\0', |b| char::from(*b))
}
