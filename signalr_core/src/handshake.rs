//! Hub protocol handshake records.
//!
//! Right after a transport connects, the client names the hub protocol it
//! will speak and the server accepts or rejects it. Both records are JSON
//! documents framed with the [record separator](crate::framing::record_separator):
//!
//! ```text
//! client → server   {"protocol":"json","version":1}\x1e
//! server → client   {"minorVersion":0}\x1e        accepted
//!                   {"error":"..."}\x1e           rejected
//! ```

use alloc::{string::String, vec::Vec};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::framing::{ParseOutcome, record_separator};

/// The client's opening record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Hub protocol name, e.g. `json`.
    pub protocol: String,

    /// Hub protocol major version.
    pub version: u32,
}

impl HandshakeRequest {
    /// A request for `protocol` at `version`.
    #[must_use]
    pub fn new(protocol: impl Into<String>, version: u32) -> Self {
        Self {
            protocol: protocol.into(),
            version,
        }
    }

    /// The JSON hub protocol, version 1.
    #[must_use]
    pub fn json() -> Self {
        Self::new("json", 1)
    }
}

/// The server's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Why the handshake was rejected, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// The server's minor version of the accepted protocol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_version: Option<u32>,
}

/// Handshake failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The record is not the expected JSON object.
    #[error("invalid handshake JSON: {0}")]
    Json(String),

    /// A required property is absent.
    #[error("missing required property '{0}'")]
    MissingField(&'static str),

    /// A hub message arrived where the handshake response was expected.
    #[error("handshake response should not have a 'type' value")]
    UnexpectedType,

    /// The server rejected the handshake.
    #[error("handshake was rejected by the server: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for HandshakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[derive(Deserialize)]
struct RawRequest {
    protocol: Option<String>,
    version: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    error: Option<String>,
    minor_version: Option<u32>,
    #[serde(rename = "type")]
    message_type: Option<serde_json::Value>,
}

/// Serialize a request, terminated by the record separator.
///
/// # Errors
///
/// Returns [`HandshakeError::Json`] if serialization fails.
pub fn write_handshake_request(request: &HandshakeRequest) -> Result<Vec<u8>, HandshakeError> {
    let json = serde_json::to_vec(request)?;
    Ok(record_separator::encode(&json))
}

/// Parse a request from the front of `buf`.
///
/// # Errors
///
/// Returns [`HandshakeError::Json`] for malformed JSON and
/// [`HandshakeError::MissingField`] if `protocol` or `version` is absent.
pub fn parse_handshake_request(buf: &[u8]) -> Result<ParseOutcome<HandshakeRequest>, HandshakeError> {
    let ParseOutcome::Complete { value, consumed } = record_separator::parse(buf) else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let raw: RawRequest = serde_json::from_slice(value)?;
    let protocol = raw.protocol.ok_or(HandshakeError::MissingField("protocol"))?;
    let version = raw.version.ok_or(HandshakeError::MissingField("version"))?;

    Ok(ParseOutcome::Complete {
        value: HandshakeRequest { protocol, version },
        consumed,
    })
}

/// Serialize a response, terminated by the record separator.
///
/// # Errors
///
/// Returns [`HandshakeError::Json`] if serialization fails.
pub fn write_handshake_response(response: &HandshakeResponse) -> Result<Vec<u8>, HandshakeError> {
    let json = serde_json::to_vec(response)?;
    Ok(record_separator::encode(&json))
}

/// Parse the server's response from the front of `buf`.
///
/// # Errors
///
/// Returns [`HandshakeError::Rejected`] if the response carries an error,
/// [`HandshakeError::UnexpectedType`] if it is a hub message, and
/// [`HandshakeError::Json`] for malformed JSON.
pub fn parse_handshake_response(buf: &[u8]) -> Result<ParseOutcome<HandshakeResponse>, HandshakeError> {
    let ParseOutcome::Complete { value, consumed } = record_separator::parse(buf) else {
        return Ok(ParseOutcome::Incomplete { consumed: 0 });
    };

    let raw: RawResponse = serde_json::from_slice(value)?;
    if raw.message_type.is_some() {
        return Err(HandshakeError::UnexpectedType);
    }
    if let Some(error) = raw.error.filter(|e| !e.is_empty()) {
        return Err(HandshakeError::Rejected(error));
    }

    Ok(ParseOutcome::Complete {
        value: HandshakeResponse {
            error: None,
            minor_version: raw.minor_version,
        },
        consumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use testresult::TestResult;

    mod request {
        use super::*;

        #[test]
        fn writes_json_then_separator() -> TestResult {
            let bytes = write_handshake_request(&HandshakeRequest::json())?;
            assert_eq!(bytes, b"{\"protocol\":\"json\",\"version\":1}\x1e");
            Ok(())
        }

        #[test]
        fn parses_what_was_written() -> TestResult {
            let request = HandshakeRequest::new("messagepack", 2);
            let bytes = write_handshake_request(&request)?;

            let parsed = parse_handshake_request(&bytes)?;
            assert_eq!(
                parsed,
                ParseOutcome::Complete {
                    value: request,
                    consumed: bytes.len()
                }
            );
            Ok(())
        }

        #[test]
        fn missing_version() {
            let result = parse_handshake_request(b"{\"protocol\":\"json\"}\x1e");
            assert_eq!(result, Err(HandshakeError::MissingField("version")));
        }
    }

    mod response {
        use super::*;

        #[test]
        fn accepted() -> TestResult {
            let parsed = parse_handshake_response(b"{\"minorVersion\":1}\x1e")?;
            assert_eq!(
                parsed.complete(),
                Some(HandshakeResponse {
                    error: None,
                    minor_version: Some(1),
                })
            );
            Ok(())
        }

        #[test]
        fn empty_object_is_accepted() -> TestResult {
            let parsed = parse_handshake_response(b"{}\x1e")?;
            assert_eq!(parsed.consumed(), 3);
            Ok(())
        }

        #[test]
        fn waits_for_the_separator() -> TestResult {
            let parsed = parse_handshake_response(b"{\"minorVersion\":1}")?;
            assert_eq!(parsed, ParseOutcome::Incomplete { consumed: 0 });
            Ok(())
        }

        #[test]
        fn error_field_rejects() {
            let result = parse_handshake_response(b"{\"error\":\"Requested protocol 'x' is not available.\"}\x1e");
            assert_eq!(
                result,
                Err(HandshakeError::Rejected(
                    "Requested protocol 'x' is not available.".into()
                ))
            );
        }

        #[test]
        fn hub_message_instead_of_response() {
            let result = parse_handshake_response(b"{\"type\":1,\"target\":\"send\"}\x1e");
            assert_eq!(result, Err(HandshakeError::UnexpectedType));
        }

        #[test]
        fn malformed_json() {
            let result = parse_handshake_response(b"{not json\x1e");
            assert!(matches!(result, Err(HandshakeError::Json(_))));
        }

        #[test]
        fn trailing_messages_are_left_unconsumed() -> TestResult {
            let buf = b"{}\x1e{\"type\":6}\x1e";
            let parsed = parse_handshake_response(buf)?;
            assert_eq!(parsed.consumed(), 3);
            Ok(())
        }

        #[test]
        fn writer_omits_absent_fields() -> TestResult {
            let bytes = write_handshake_response(&HandshakeResponse {
                error: None,
                minor_version: Some(0),
            })?;
            assert_eq!(bytes, b"{\"minorVersion\":0}\x1e");
            Ok(())
        }
    }
}
