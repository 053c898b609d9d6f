//! Record-separator framing for hub-level JSON.
//!
//! Each document is terminated by the ASCII record separator (`0x1E`). The
//! payload itself must not contain that byte, which JSON text never does.

use alloc::vec::Vec;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{CodecError, ParseOutcome};

/// The record terminator.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Parse one record from the front of `buf`.
///
/// Framing cannot be malformed at this layer; the payload is borrowed from
/// the input without the terminator.
#[must_use]
pub fn parse(buf: &[u8]) -> ParseOutcome<&[u8]> {
    match buf.iter().position(|&b| b == RECORD_SEPARATOR) {
        Some(end) => {
            let (record, _) = buf.split_at(end);
            ParseOutcome::Complete {
                value: record,
                consumed: end + 1,
            }
        }
        None => ParseOutcome::Incomplete { consumed: 0 },
    }
}

/// Iterate over every complete record in `buf`.
pub fn records(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = buf;
    core::iter::from_fn(move || match parse(rest) {
        ParseOutcome::Complete { value, consumed } => {
            rest = rest.get(consumed..).unwrap_or_default();
            Some(value)
        }
        ParseOutcome::Incomplete { .. } => None,
    })
}

/// Append one record to `out`.
pub fn write(payload: &[u8], out: &mut impl BufMut) {
    out.put_slice(payload);
    out.put_u8(RECORD_SEPARATOR);
}

/// Encode a single record.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    write(payload, &mut out);
    out
}

/// [`tokio_util::codec`] adapter for record-separator framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSeparatorFraming;

impl Decoder for RecordSeparatorFraming {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse(src) {
            ParseOutcome::Complete { value, consumed } => {
                let record = value.to_vec();
                src.advance(consumed);
                Ok(Some(record))
            }
            ParseOutcome::Incomplete { .. } => Ok(None),
        }
    }
}

impl Encoder<&[u8]> for RecordSeparatorFraming {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        write(item, dst);
        Ok(())
    }
}
