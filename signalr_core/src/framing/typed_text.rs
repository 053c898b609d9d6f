//! Typed text framing.
//!
//! A record-style variant of [`text`](super::text) framing in which every
//! frame also carries its [`MessageKind`] marker:
//!
//! ```text
//! T 5:T:hello; 0:C:;
//! ^ ^ ^ ^      ^ ^
//! | | | |      | kind
//! | | | |      length
//! | | | payload
//! | | kind marker (T / B / C / E)
//! | length
//! format indicator
//! ```
//!
//! A batch starts with a single format indicator byte. Only text batches
//! (`T`) exist on this channel; a binary batch (`B`) or a binary message
//! inside a text batch is reported as [`FormatError::BinaryUnsupported`].

use alloc::vec::Vec;

use bytes::BufMut;

use super::{FormatError, ParseOutcome, char_at, text};
use crate::message::{Message, MessageKind};

/// Format indicator for a text batch.
pub const TEXT_BATCH: u8 = b'T';

/// Format indicator for a binary batch.
pub const BINARY_BATCH: u8 = b'B';

/// Separates the kind marker from the payload.
pub const KIND_SEPARATOR: u8 = b':';

/// Parse a complete batch body.
///
/// An empty body contains no messages.
///
/// # Errors
///
/// Returns [`FormatError::UnknownFormatIndicator`] for an unrecognized first
/// byte, [`FormatError::Truncated`] if the body ends inside a frame, or any
/// error from [`parse`].
pub fn parse_batch(body: &[u8]) -> Result<Vec<Message>, FormatError> {
    let Some((&indicator, mut rest)) = body.split_first() else {
        return Ok(Vec::new());
    };

    match indicator {
        TEXT_BATCH => {}
        BINARY_BATCH => return Err(FormatError::BinaryUnsupported),
        other => return Err(FormatError::UnknownFormatIndicator(char::from(other))),
    }

    let mut messages = Vec::new();
    while !rest.is_empty() {
        match parse(rest)? {
            ParseOutcome::Complete { value, consumed } => {
                messages.push(value);
                rest = rest.get(consumed..).unwrap_or_default();
            }
            ParseOutcome::Incomplete { .. } => {
                return Err(FormatError::Truncated {
                    remaining: rest.len(),
                });
            }
        }
    }

    Ok(messages)
}

/// Encode `messages` as a text batch.
///
/// # Errors
///
/// Returns [`FormatError::BinaryUnsupported`] if any message is binary.
pub fn write_batch(messages: &[Message]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(
        1 + messages
            .iter()
            .map(|m| m.payload().len() + 16)
            .sum::<usize>(),
    );
    out.put_u8(TEXT_BATCH);
    for message in messages {
        write(message, &mut out)?;
    }
    Ok(out)
}

/// Parse a single `{length}:{kind}:{payload};` frame.
///
/// # Errors
///
/// Returns a [`FormatError`] for a malformed length, an unknown or binary
/// kind marker, a missing separator, or a missing trailer.
pub fn parse(buf: &[u8]) -> Result<ParseOutcome<Message>, FormatError> {
    let Some((length, header)) = text::read_length(buf)? else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let rest = buf.get(header..).unwrap_or_default();
    let Some(&marker) = rest.first() else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let kind = match MessageKind::from_marker(marker) {
        Some(MessageKind::Binary) => return Err(FormatError::BinaryUnsupported),
        Some(kind) => kind,
        None => return Err(FormatError::UnknownMessageType(char::from(marker))),
    };

    match rest.get(1) {
        None => return Ok(ParseOutcome::Incomplete { consumed: 0 }),
        Some(&KIND_SEPARATOR) => {}
        Some(_) => {
            return Err(FormatError::MissingSeparator {
                expected: char::from(KIND_SEPARATOR),
                found: char_at(rest, 1),
            });
        }
    }

    let body = rest.get(2..).unwrap_or_default();
    if body.len() <= length {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    }

    let (payload, tail) = body.split_at(length);
    match tail.first() {
        Some(&text::TRAILER) => Ok(ParseOutcome::Complete {
            value: Message::new(kind, payload),
            consumed: header + 2 + length + 1,
        }),
        _ => Err(FormatError::MissingTrailer {
            found: char_at(tail, 0),
        }),
    }
}

/// Append one typed frame to `out`.
///
/// # Errors
///
/// Returns [`FormatError::BinaryUnsupported`] for binary messages, or
/// [`FormatError::MessageTooLarge`] for oversized payloads.
pub fn write(message: &Message, out: &mut impl BufMut) -> Result<(), FormatError> {
    if message.kind() == MessageKind::Binary {
        return Err(FormatError::BinaryUnsupported);
    }

    let payload = message.payload();
    if payload.len() > text::MAX_PAYLOAD_LEN {
        return Err(FormatError::MessageTooLarge);
    }

    out.put_slice(payload.len().to_string().as_bytes());
    out.put_u8(text::LENGTH_SEPARATOR);
    out.put_u8(message.kind().marker());
    out.put_u8(KIND_SEPARATOR);
    out.put_slice(payload);
    out.put_u8(text::TRAILER);
    Ok(())
}
