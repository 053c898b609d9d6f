//! Text length-prefixed framing.
//!
//! ```text
//! ┌────────────────┬───┬──────────────────┬───┐
//! │ length (ASCII) │ : │ payload (length) │ ; │
//! └────────────────┴───┴──────────────────┴───┘
//! ```
//!
//! The length is a decimal integer counting payload bytes. A leading `-` is
//! accepted by the lexer only so that negative lengths can be rejected with a
//! precise error; a leading `+` is never valid.

use alloc::{string::String, vec::Vec};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{CodecError, FormatError, ParseOutcome};

/// Separates the length prefix from the payload.
pub const LENGTH_SEPARATOR: u8 = b':';

/// Terminates every frame.
pub const TRAILER: u8 = b';';

/// Largest encodable payload length (`i32::MAX`).
pub const MAX_PAYLOAD_LEN: usize = 0x7fff_ffff;

/// Digits in `i32::MAX`.
const MAX_LENGTH_DIGITS: usize = 10;

/// Parse one frame from the front of `buf`.
///
/// # Errors
///
/// Returns a [`FormatError`] if the length prefix is malformed, negative, or
/// overflows, or if the payload is not followed by `;`.
pub fn parse(buf: &[u8]) -> Result<ParseOutcome<Vec<u8>>, FormatError> {
    let Some((length, header)) = read_length(buf)? else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let rest = buf.get(header..).unwrap_or_default();
    if rest.len() <= length {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    }

    let (payload, tail) = rest.split_at(length);
    match tail.first() {
        Some(&TRAILER) => Ok(ParseOutcome::Complete {
            value: payload.to_vec(),
            consumed: header + length + 1,
        }),
        Some(&other) => Err(FormatError::MissingTrailer {
            found: char::from(other),
        }),
        None => Ok(ParseOutcome::Incomplete { consumed: 0 }),
    }
}

/// Parse every complete frame in `buf`.
///
/// Returns the payloads and the number of bytes they occupied. Any trailing
/// partial frame is left for the next call.
///
/// # Errors
///
/// Returns the first [`FormatError`] encountered.
pub fn parse_all(buf: &[u8]) -> Result<(Vec<Vec<u8>>, usize), FormatError> {
    let mut payloads = Vec::new();
    let mut offset = 0;

    while let ParseOutcome::Complete { value, consumed } =
        parse(buf.get(offset..).unwrap_or_default())?
    {
        payloads.push(value);
        offset += consumed;
    }

    Ok((payloads, offset))
}

/// Append one frame to `out`.
///
/// # Errors
///
/// Returns [`FormatError::MessageTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn write(payload: &[u8], out: &mut impl BufMut) -> Result<(), FormatError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FormatError::MessageTooLarge);
    }

    out.put_slice(payload.len().to_string().as_bytes());
    out.put_u8(LENGTH_SEPARATOR);
    out.put_slice(payload);
    out.put_u8(TRAILER);
    Ok(())
}

/// Encode a single frame.
///
/// # Errors
///
/// See [`write`].
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(payload.len() + MAX_LENGTH_DIGITS + 2);
    write(payload, &mut out)?;
    Ok(out)
}

/// Read a `{length}:` prefix.
///
/// Returns the length and the number of prefix bytes (including the `:`),
/// or `None` if the separator has not arrived yet.
pub(crate) fn read_length(buf: &[u8]) -> Result<Option<(usize, usize)>, FormatError> {
    match buf.iter().position(|&b| b == LENGTH_SEPARATOR) {
        Some(colon) => {
            let (prefix, _) = buf.split_at(colon);
            Ok(Some((parse_length(prefix)?, colon + 1)))
        }
        None => {
            check_partial_length(buf)?;
            Ok(None)
        }
    }
}

fn parse_length(prefix: &[u8]) -> Result<usize, FormatError> {
    let (negative, digits) = split_sign(prefix);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid_length(prefix));
    }

    let mut value: u64 = 0;
    for digit in digits {
        value = value * 10 + u64::from(digit - b'0');
        if value > MAX_PAYLOAD_LEN as u64 {
            return Err(FormatError::LengthOverflow);
        }
    }

    if negative && value != 0 {
        return Err(FormatError::NegativeLength(value));
    }

    usize::try_from(value).map_err(|_| FormatError::LengthOverflow)
}

/// Reject a separator-less prefix as soon as it can no longer become valid.
fn check_partial_length(prefix: &[u8]) -> Result<(), FormatError> {
    let (_, digits) = split_sign(prefix);
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid_length(prefix));
    }
    if digits.len() > MAX_LENGTH_DIGITS {
        return Err(FormatError::LengthOverflow);
    }
    Ok(())
}

fn split_sign(prefix: &[u8]) -> (bool, &[u8]) {
    match prefix.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, prefix),
    }
}

fn invalid_length(prefix: &[u8]) -> FormatError {
    FormatError::InvalidLength(String::from_utf8_lossy(prefix).into_owned())
}

/// [`tokio_util::codec`] adapter for text framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextFraming;

impl Decoder for TextFraming {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse(src)? {
            ParseOutcome::Complete { value, consumed } => {
                src.advance(consumed);
                Ok(Some(value))
            }
            ParseOutcome::Incomplete { .. } => Ok(None),
        }
    }
}

impl Encoder<&[u8]> for TextFraming {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + MAX_LENGTH_DIGITS + 2);
        write(item, dst)?;
        Ok(())
    }
}
