//! Binary varint length-prefixed framing.
//!
//! Each frame is a 7-bit little-endian varint length followed by exactly that
//! many payload bytes. The high bit of each prefix byte is the continuation
//! flag; value bits accumulate least-significant group first.
//!
//! | Prefix bytes | Payload lengths            |
//! |--------------|----------------------------|
//! | 1            | 0 ..= 127                  |
//! | 2            | 128 ..= 16 383             |
//! | 3            | 16 384 ..= 2 097 151       |
//! | 4            | 2 097 152 ..= 268 435 455  |
//! | 5            | 268 435 456 ..= 2^31 - 1   |
//!
//! The fifth byte may only carry the three remaining bits of a 31-bit
//! length, so any fifth byte greater than `0x07` is rejected as
//! [`FormatError::MessageTooLarge`].

use alloc::vec::Vec;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{CodecError, FormatError, ParseOutcome};

/// Maximum number of length-prefix bytes.
pub const MAX_LENGTH_PREFIX: usize = 5;

/// Largest encodable payload length (`i32::MAX`).
pub const MAX_PAYLOAD_LEN: usize = 0x7fff_ffff;

const CONTINUATION: u8 = 0x80;
const VALUE_MASK: u8 = 0x7f;
const LAST_BYTE_MAX: u8 = 0x07;

/// Parse one frame from the front of `buf`.
///
/// # Errors
///
/// Returns [`FormatError::MessageTooLarge`] if the length prefix does not fit
/// in 31 bits.
pub fn parse(buf: &[u8]) -> Result<ParseOutcome<Vec<u8>>, FormatError> {
    let Some((length, header)) = read_length(buf)? else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let payload = buf
        .get(header..)
        .and_then(|rest| rest.get(..length));

    Ok(match payload {
        Some(payload) => ParseOutcome::Complete {
            value: payload.to_vec(),
            consumed: header + length,
        },
        None => ParseOutcome::Incomplete { consumed: 0 },
    })
}

/// Parse every complete frame in `buf`.
///
/// Returns the payloads and the number of bytes they occupied.
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

/// Read the varint length prefix.
///
/// Returns the payload length and the prefix size, or `None` if the prefix
/// is still incomplete.
///
/// # Errors
///
/// Returns [`FormatError::MessageTooLarge`] if the fifth byte is greater than
/// `0x07` (which includes a fifth byte with the continuation bit set).
pub fn read_length(buf: &[u8]) -> Result<Option<(usize, usize)>, FormatError> {
    let mut length: u32 = 0;

    for (index, &byte) in buf.iter().take(MAX_LENGTH_PREFIX).enumerate() {
        if index == MAX_LENGTH_PREFIX - 1 && byte > LAST_BYTE_MAX {
            return Err(FormatError::MessageTooLarge);
        }

        length |= u32::from(byte & VALUE_MASK) << (7 * index);

        if byte & CONTINUATION == 0 {
            let length = usize::try_from(length).map_err(|_| FormatError::MessageTooLarge)?;
            return Ok(Some((length, index + 1)));
        }
    }

    Ok(None)
}

/// Append a varint length prefix to `out`.
///
/// # Errors
///
/// Returns [`FormatError::MessageTooLarge`] if `length` exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn write_length(length: usize, out: &mut impl BufMut) -> Result<(), FormatError> {
    if length > MAX_PAYLOAD_LEN {
        return Err(FormatError::MessageTooLarge);
    }

    let mut remaining = length;
    loop {
        #[allow(clippy::cast_possible_truncation)] // masked to 7 bits
        let group = (remaining & usize::from(VALUE_MASK)) as u8;
        remaining >>= 7;
        if remaining == 0 {
            out.put_u8(group);
            return Ok(());
        }
        out.put_u8(group | CONTINUATION);
    }
}

/// Append one frame to `out`.
///
/// # Errors
///
/// See [`write_length`].
pub fn write(payload: &[u8], out: &mut impl BufMut) -> Result<(), FormatError> {
    write_length(payload.len(), out)?;
    out.put_slice(payload);
    Ok(())
}

/// Encode a single frame.
///
/// # Errors
///
/// See [`write_length`].
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(payload.len() + MAX_LENGTH_PREFIX);
    write(payload, &mut out)?;
    Ok(out)
}

/// [`tokio_util::codec`] adapter for binary framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinaryFraming;

impl Decoder for BinaryFraming {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse(src)? {
            ParseOutcome::Complete { value, consumed } => {
                src.advance(consumed);
                Ok(Some(value))
            }
            ParseOutcome::Incomplete { .. } => {
                if let Some((length, header)) = read_length(src)? {
                    src.reserve((header + length).saturating_sub(src.len()));
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<&[u8]> for BinaryFraming {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + MAX_LENGTH_PREFIX);
        write(item, dst)?;
        Ok(())
    }
}
