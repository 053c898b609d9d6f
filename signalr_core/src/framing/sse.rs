//! Server-Sent-Events framing.
//!
//! Every line of an event is `data: ` followed by content and `\r\n`. The
//! first line carries the single-character message kind; the remaining
//! lines carry the payload, one line each; a blank line ends the message.
//!
//! ```text
//! data: T\r\n
//! data: first line\r\n
//! data: second line\r\n
//! \r\n
//! ```
//!
//! SSE is a text channel, so binary messages are rejected in both
//! directions.

use alloc::{string::String, vec::Vec};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Decoder;

use super::{CodecError, FormatError, ParseOutcome};
use crate::message::{Message, MessageKind};

/// Prefix of every event line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Terminates every line.
pub const NEWLINE: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    ReadMessageType,
    ReadMessagePayload,
    ReadEndOfMessage,
}

/// Incremental SSE message parser.
///
/// Complete lines are consumed into the parser as they arrive, so an
/// [`ParseOutcome::Incomplete`] result may still report consumed bytes. The
/// caller must drop those bytes and pass only new data next time.
#[derive(Debug, Clone, Default)]
pub struct SseParser {
    state: State,
    kind: Option<MessageKind>,
    lines: Vec<Vec<u8>>,
}

impl SseParser {
    /// Create a parser waiting for the start of a message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse lines from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] for a bare `\n` line ending, a line without
    /// the `data: ` prefix, an unknown or binary message kind, or a
    /// non-blank line where the end of the message was expected. The parser
    /// is reset after an error.
    pub fn parse(&mut self, buf: &[u8]) -> Result<ParseOutcome<Message>, FormatError> {
        let result = self.parse_lines(buf);
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// Discard any partially parsed message.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether a message has started but not yet ended.
    #[must_use]
    pub fn in_message(&self) -> bool {
        self.state != State::ReadMessageType
    }

    /// Payload bytes held for the message in progress.
    #[must_use]
    pub fn held_bytes(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }

    fn parse_lines(&mut self, buf: &[u8]) -> Result<ParseOutcome<Message>, FormatError> {
        let mut consumed = 0;

        loop {
            let rest = buf.get(consumed..).unwrap_or_default();

            if self.state == State::ReadMessagePayload && rest.first() == Some(&b'\r') {
                self.state = State::ReadEndOfMessage;
            }

            let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
                return Ok(ParseOutcome::Incomplete { consumed });
            };

            let line = match newline.checked_sub(1).map(|cr| rest.split_at(cr)) {
                Some((line, [b'\r', b'\n', ..])) => line,
                _ => return Err(FormatError::MissingCarriageReturn),
            };
            consumed += newline + 1;

            match self.state {
                State::ReadEndOfMessage => {
                    if !line.is_empty() {
                        return Err(FormatError::MissingEndOfMessage);
                    }
                    let message = self.finish();
                    return Ok(ParseOutcome::Complete {
                        value: message,
                        consumed,
                    });
                }
                State::ReadMessageType => {
                    self.kind = Some(read_kind(strip_data_prefix(line)?)?);
                    self.state = State::ReadMessagePayload;
                }
                State::ReadMessagePayload => {
                    self.lines.push(strip_data_prefix(line)?.to_vec());
                }
            }
        }
    }

    fn finish(&mut self) -> Message {
        let kind = self.kind.unwrap_or(MessageKind::Text);
        let payload = self.lines.join(&b'\n');
        self.reset();
        Message::new(kind, payload)
    }
}

fn strip_data_prefix(line: &[u8]) -> Result<&[u8], FormatError> {
    line.strip_prefix(DATA_PREFIX)
        .ok_or(FormatError::MissingDataPrefix)
}

fn read_kind(content: &[u8]) -> Result<MessageKind, FormatError> {
    let &[marker] = content else {
        return Err(FormatError::InvalidMessageType(
            String::from_utf8_lossy(content).into_owned(),
        ));
    };

    match MessageKind::from_marker(marker) {
        Some(MessageKind::Binary) => Err(FormatError::BinaryUnsupported),
        Some(kind) => Ok(kind),
        None => Err(FormatError::UnknownMessageType(char::from(marker))),
    }
}

/// Append one SSE event for `message` to `out`.
///
/// A payload ending in `\n` gets an extra empty `data: ` line so the trailing
/// newline survives the round trip.
///
/// # Errors
///
/// Returns [`FormatError::BinaryUnsupported`] for binary messages.
pub fn write(message: &Message, out: &mut impl BufMut) -> Result<(), FormatError> {
    if message.kind() == MessageKind::Binary {
        return Err(FormatError::BinaryUnsupported);
    }

    write_line(&[message.kind().marker()], out);
    for line in message.payload().split(|&b| b == b'\n') {
        write_line(line, out);
    }
    out.put_slice(NEWLINE);
    Ok(())
}

/// Encode a single SSE event.
///
/// # Errors
///
/// See [`write`].
pub fn encode(message: &Message) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(message.payload().len() + 32);
    write(message, &mut out)?;
    Ok(out)
}

fn write_line(content: &[u8], out: &mut impl BufMut) {
    out.put_slice(DATA_PREFIX);
    out.put_slice(content);
    out.put_slice(NEWLINE);
}

/// [`tokio_util::codec`] adapter around [`SseParser`].
#[derive(Debug, Clone, Default)]
pub struct SseDecoder {
    parser: SseParser,
}

impl SseDecoder {
    /// Create a decoder waiting for the start of a message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SseDecoder {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let outcome = self.parser.parse(src)?;
        src.advance(outcome.consumed());
        Ok(outcome.complete())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        // Complete lines already live in the parser, so an empty `src` can
        // still hide a partial message.
        if self.parser.in_message() || !src.is_empty() {
            let remaining = self.parser.held_bytes() + src.len();
            self.parser.reset();
            src.clear();
            return Err(FormatError::Truncated { remaining }.into());
        }

        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> Result<ParseOutcome<Message>, FormatError> {
        SseParser::new().parse(input)
    }

    mod parse {
        use super::*;

        #[test]
        fn empty_input_is_incomplete() {
            assert_eq!(parse_one(b""), Ok(ParseOutcome::Incomplete { consumed: 0 }));
        }

        #[test]
        fn single_line_message() {
            let input = b"data: T\r\ndata: hello\r\n\r\n";
            assert_eq!(
                parse_one(input),
                Ok(ParseOutcome::Complete {
                    value: Message::text("hello"),
                    consumed: input.len(),
                })
            );
        }

        #[test]
        fn multi_line_payload_is_joined_with_newlines() {
            let input = b"data: T\r\ndata: one\r\ndata: two\r\n\r\n";
            let value = parse_one(input).map(ParseOutcome::complete);
            assert_eq!(value, Ok(Some(Message::text("one\ntwo"))));
        }

        #[test]
        fn message_without_payload_lines() {
            let value = parse_one(b"data: C\r\n\r\n").map(ParseOutcome::complete);
            assert_eq!(value, Ok(Some(Message::close(""))));
        }

        #[test]
        fn error_kind() {
            let value = parse_one(b"data: E\r\ndata: boom\r\n\r\n").map(ParseOutcome::complete);
            assert_eq!(value, Ok(Some(Message::error("boom"))));
        }

        #[test]
        fn stops_at_end_of_first_message() {
            let first = b"data: T\r\ndata: a\r\n\r\n";
            let mut input = first.to_vec();
            input.extend_from_slice(b"data: T\r\ndata: b\r\n\r\n");
            assert_eq!(parse_one(&input).map(|o| o.consumed()), Ok(first.len()));
        }
    }

    mod incremental {
        use super::*;

        #[test]
        fn consumes_complete_lines_only() {
            let mut parser = SseParser::new();
            assert_eq!(
                parser.parse(b"data: T\r\ndata: hel"),
                Ok(ParseOutcome::Incomplete { consumed: 9 })
            );
            assert_eq!(
                parser.parse(b"data: hello\r\n"),
                Ok(ParseOutcome::Incomplete { consumed: 13 })
            );
            assert_eq!(
                parser.parse(b"\r\n"),
                Ok(ParseOutcome::Complete {
                    value: Message::text("hello"),
                    consumed: 2,
                })
            );
        }

        #[test]
        fn decoder_handles_byte_at_a_time_input() -> Result<(), CodecError> {
            let wire = b"data: T\r\ndata: x\r\ndata: y\r\n\r\ndata: C\r\n\r\n";
            let mut decoder = SseDecoder::new();
            let mut buf = BytesMut::new();
            let mut messages = Vec::new();

            for byte in wire {
                buf.put_u8(*byte);
                while let Some(message) = decoder.decode(&mut buf)? {
                    messages.push(message);
                }
            }

            assert_eq!(messages, vec![Message::text("x\ny"), Message::close("")]);
            assert!(buf.is_empty());
            Ok(())
        }

        #[test]
        fn end_of_stream_between_messages_is_clean() -> Result<(), CodecError> {
            let mut decoder = SseDecoder::new();
            let mut buf = BytesMut::from(&b"data: T\r\ndata: x\r\n\r\n"[..]);

            assert_eq!(decoder.decode_eof(&mut buf)?, Some(Message::text("x")));
            assert_eq!(decoder.decode_eof(&mut buf)?, None);
            Ok(())
        }

        #[test]
        fn end_of_stream_inside_a_message_is_truncation() -> Result<(), CodecError> {
            let mut decoder = SseDecoder::new();
            let mut buf = BytesMut::from(&b"data: T\r\ndata: lost payload\r\n"[..]);

            assert_eq!(decoder.decode(&mut buf)?, None);
            assert!(buf.is_empty());

            let result = decoder.decode_eof(&mut buf);
            assert!(matches!(
                result,
                Err(CodecError::Format(FormatError::Truncated { remaining: 12 }))
            ));
            assert!(!decoder.parser.in_message());
            Ok(())
        }

        #[test]
        fn end_of_stream_with_a_partial_line_is_truncation() {
            let mut decoder = SseDecoder::new();
            let mut buf = BytesMut::from(&b"data: T\r\ndata: hal"[..]);

            let result = decoder.decode_eof(&mut buf);
            assert!(matches!(
                result,
                Err(CodecError::Format(FormatError::Truncated { remaining: 9 }))
            ));
            assert!(buf.is_empty());
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn bare_newline() {
            assert_eq!(
                parse_one(b"data: T\n"),
                Err(FormatError::MissingCarriageReturn)
            );
        }

        #[test]
        fn bare_newline_at_start() {
            assert_eq!(parse_one(b"\n"), Err(FormatError::MissingCarriageReturn));
        }

        #[test]
        fn missing_data_prefix() {
            assert_eq!(
                parse_one(b"event: T\r\n"),
                Err(FormatError::MissingDataPrefix)
            );
        }

        #[test]
        fn binary_is_unsupported() {
            assert_eq!(
                parse_one(b"data: B\r\n"),
                Err(FormatError::BinaryUnsupported)
            );
        }

        #[test]
        fn unknown_kind_is_named() {
            assert_eq!(
                parse_one(b"data: X\r\n"),
                Err(FormatError::UnknownMessageType('X'))
            );
        }

        #[test]
        fn multi_character_kind() {
            assert!(matches!(
                parse_one(b"data: TT\r\n"),
                Err(FormatError::InvalidMessageType(s)) if s == "TT"
            ));
        }

        #[test]
        fn junk_where_blank_line_expected() {
            assert_eq!(
                parse_one(b"data: T\r\ndata: a\r\n\rx\r\n"),
                Err(FormatError::MissingEndOfMessage)
            );
        }

        #[test]
        fn parser_is_reusable_after_error() {
            let mut parser = SseParser::new();
            assert!(parser.parse(b"data: T\r\nbogus\r\n").is_err());
            assert_eq!(
                parser.parse(b"data: T\r\ndata: ok\r\n\r\n").map(ParseOutcome::complete),
                Ok(Some(Message::text("ok")))
            );
        }
    }

    mod format {
        use super::*;

        #[test]
        fn single_line() {
            assert_eq!(
                encode(&Message::text("hello")),
                Ok(b"data: T\r\ndata: hello\r\n\r\n".to_vec())
            );
        }

        #[test]
        fn trailing_newline_gets_an_empty_data_line() {
            assert_eq!(
                encode(&Message::text("hello\n")),
                Ok(b"data: T\r\ndata: hello\r\ndata: \r\n\r\n".to_vec())
            );
        }

        #[test]
        fn binary_is_unsupported() {
            assert_eq!(
                encode(&Message::binary([0, 1])),
                Err(FormatError::BinaryUnsupported)
            );
        }

        #[test]
        fn round_trip() {
            for message in [
                Message::text("plain"),
                Message::text("line one\nline two\n"),
                Message::text("crlf\r\ninside"),
                Message::close("bye"),
                Message::error(""),
            ] {
                let wire = encode(&message).expect("encode");
                assert_eq!(
                    parse_one(&wire),
                    Ok(ParseOutcome::Complete {
                        value: message,
                        consumed: wire.len(),
                    })
                );
            }
        }
    }
}
