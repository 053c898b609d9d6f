//! The negotiate document.
//!
//! Before opening a transport, a client `POST`s to `{base}/negotiate` and
//! receives either a redirect or a connection offer:
//!
//! ```json
//! {
//!   "connectionId": "807809a5-31bf-470d-9e23-afaee35d8a0d",
//!   "availableTransports": [
//!     { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] },
//!     { "transport": "ServerSentEvents", "transferFormats": ["Text"] },
//!     { "transport": "LongPolling", "transferFormats": ["Text", "Binary"] }
//!   ]
//! }
//! ```
//!
//! ```json
//! { "url": "https://other.example/chat", "accessToken": "..." }
//! ```
//!
//! Parsing deserializes straight into optional fields with `serde_json`'s
//! streaming deserializer (no intermediate `Value` tree), skipping unknown
//! keys, and then validates which fields are required.

use alloc::{string::String, vec::Vec};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{TransferFormat, TransferFormats, TransportType};

/// The server's answer to a negotiate request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationResponse {
    /// Redirect target. When present, the client negotiates again there.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer token for requests that follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Opaque connection identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    /// Transports the server offers, in server order.
    pub available_transports: Vec<AvailableTransport>,
}

impl NegotiationResponse {
    /// A connection offer.
    #[must_use]
    pub fn offer(
        connection_id: impl Into<String>,
        available_transports: Vec<AvailableTransport>,
    ) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            available_transports,
            ..Self::default()
        }
    }

    /// A redirect to another endpoint.
    #[must_use]
    pub fn redirect(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            url: Some(url.into()),
            access_token,
            ..Self::default()
        }
    }

    /// Find the advertisement for a transport, if the server offers it.
    #[must_use]
    pub fn transport(&self, transport: TransportType) -> Option<&AvailableTransport> {
        self.available_transports
            .iter()
            .find(|t| t.transport_type() == Some(transport))
    }
}

/// One transport advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name, e.g. `"WebSockets"`.
    pub transport: String,

    /// Transfer format names, e.g. `["Text", "Binary"]`.
    pub transfer_formats: Vec<String>,
}

impl AvailableTransport {
    /// Advertise `transport` with the given formats.
    #[must_use]
    pub fn new(transport: TransportType, formats: TransferFormats) -> Self {
        Self {
            transport: transport.name().into(),
            transfer_formats: formats.iter().map(|f| f.name().into()).collect(),
        }
    }

    /// The advertised transport, if this client knows it.
    #[must_use]
    pub fn transport_type(&self) -> Option<TransportType> {
        TransportType::from_name(&self.transport)
    }

    /// The advertised formats this client knows.
    #[must_use]
    pub fn transfer_formats(&self) -> TransferFormats {
        self.transfer_formats
            .iter()
            .filter_map(|name| TransferFormat::from_name(name))
            .collect()
    }
}

/// Problem reading a negotiate document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiateError {
    /// The document is not valid JSON of the expected shape.
    #[error("invalid negotiation response: {0}")]
    InvalidJson(String),

    /// A required property is absent.
    #[error("missing required property '{0}'")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for NegotiateError {
    fn from(err: serde_json::Error) -> Self {
        NegotiateError::InvalidJson(err.to_string())
    }
}

/// Serialize a negotiate document.
///
/// # Errors
///
/// Returns [`NegotiateError::InvalidJson`] if serialization fails, which
/// only happens if the writer fails.
pub fn write_negotiate_response(response: &NegotiationResponse) -> Result<Vec<u8>, NegotiateError> {
    Ok(serde_json::to_vec(response)?)
}

/// Parse and validate a negotiate document.
///
/// # Errors
///
/// Returns [`NegotiateError::InvalidJson`] for malformed JSON and
/// [`NegotiateError::MissingField`] naming the first missing property:
/// `transport` or `transferFormats` on any transport entry, then
/// `connectionId` and `availableTransports` when no `url` is given.
pub fn parse_negotiate_response(bytes: &[u8]) -> Result<NegotiationResponse, NegotiateError> {
    let raw: RawNegotiation = serde_json::from_slice(bytes)?;

    let available_transports = raw
        .available_transports
        .map(|entries| {
            entries
                .into_iter()
                .map(RawTransport::validate)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    if raw.url.is_none() {
        if raw.connection_id.is_none() {
            return Err(NegotiateError::MissingField("connectionId"));
        }
        if available_transports.is_none() {
            return Err(NegotiateError::MissingField("availableTransports"));
        }
    }

    Ok(NegotiationResponse {
        url: raw.url,
        access_token: raw.access_token,
        connection_id: raw.connection_id,
        available_transports: available_transports.unwrap_or_default(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNegotiation {
    url: Option<String>,
    access_token: Option<String>,
    connection_id: Option<String>,
    available_transports: Option<Vec<RawTransport>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransport {
    transport: Option<String>,
    transfer_formats: Option<Vec<String>>,
}

impl RawTransport {
    fn validate(self) -> Result<AvailableTransport, NegotiateError> {
        let transport = self
            .transport
            .ok_or(NegotiateError::MissingField("transport"))?;
        let transfer_formats = self
            .transfer_formats
            .ok_or(NegotiateError::MissingField("transferFormats"))?;
        Ok(AvailableTransport {
            transport,
            transfer_formats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse {
        use super::*;

        #[test]
        fn full_offer() -> Result<(), NegotiateError> {
            let response = parse_negotiate_response(
                br#"{
                    "connectionId": "123",
                    "availableTransports": [
                        { "transport": "WebSockets", "transferFormats": ["Text", "Binary"] },
                        { "transport": "ServerSentEvents", "transferFormats": ["Text"] }
                    ]
                }"#,
            )?;

            assert_eq!(response.connection_id.as_deref(), Some("123"));
            assert_eq!(response.url, None);
            assert_eq!(response.available_transports.len(), 2);

            let sse = response
                .transport(TransportType::ServerSentEvents)
                .map(AvailableTransport::transfer_formats);
            assert_eq!(sse, Some(TransferFormats::TEXT));
            Ok(())
        }

        #[test]
        fn redirect_alone_is_valid() -> Result<(), NegotiateError> {
            let response = parse_negotiate_response(br#"{"url":"https://example.com/hub"}"#)?;
            assert_eq!(response.url.as_deref(), Some("https://example.com/hub"));
            assert_eq!(response.connection_id, None);
            assert!(response.available_transports.is_empty());
            Ok(())
        }

        #[test]
        fn redirect_with_token() -> Result<(), NegotiateError> {
            let response = parse_negotiate_response(
                br#"{"url":"https://example.com/hub","accessToken":"secret"}"#,
            )?;
            assert_eq!(response.access_token.as_deref(), Some("secret"));
            Ok(())
        }

        #[test]
        fn unknown_fields_are_skipped() -> Result<(), NegotiateError> {
            let response = parse_negotiate_response(
                br#"{
                    "negotiateVersion": 1,
                    "connectionId": "abc",
                    "extra": { "nested": [1, 2, {"deep": null}] },
                    "availableTransports": [
                        { "transport": "LongPolling", "transferFormats": ["Text"], "future": true }
                    ]
                }"#,
            )?;
            assert_eq!(response.connection_id.as_deref(), Some("abc"));
            assert_eq!(
                response.available_transports,
                vec![AvailableTransport {
                    transport: "LongPolling".into(),
                    transfer_formats: vec!["Text".into()],
                }]
            );
            Ok(())
        }

        #[test]
        fn empty_transport_list_is_allowed() -> Result<(), NegotiateError> {
            let response =
                parse_negotiate_response(br#"{"connectionId":"1","availableTransports":[]}"#)?;
            assert!(response.available_transports.is_empty());
            Ok(())
        }

        #[test]
        fn unknown_transport_names_are_kept_but_untyped() -> Result<(), NegotiateError> {
            let response = parse_negotiate_response(
                br#"{"connectionId":"1","availableTransports":[{"transport":"Carrier Pigeon","transferFormats":["Feathers"]}]}"#,
            )?;
            let entry = response.available_transports.first();
            assert_eq!(entry.and_then(AvailableTransport::transport_type), None);
            assert_eq!(
                entry.map(AvailableTransport::transfer_formats),
                Some(TransferFormats::NONE)
            );
            Ok(())
        }
    }

    mod missing_fields {
        use super::*;

        #[test]
        fn connection_id() {
            assert_eq!(
                parse_negotiate_response(br#"{"availableTransports":[]}"#),
                Err(NegotiateError::MissingField("connectionId"))
            );
        }

        #[test]
        fn available_transports() {
            assert_eq!(
                parse_negotiate_response(br#"{"connectionId":"123"}"#),
                Err(NegotiateError::MissingField("availableTransports"))
            );
        }

        #[test]
        fn transport_name() {
            assert_eq!(
                parse_negotiate_response(
                    br#"{"connectionId":"1","availableTransports":[{"transferFormats":["Text"]}]}"#
                ),
                Err(NegotiateError::MissingField("transport"))
            );
        }

        #[test]
        fn transfer_formats() {
            assert_eq!(
                parse_negotiate_response(
                    br#"{"connectionId":"1","availableTransports":[{"transport":"WebSockets"}]}"#
                ),
                Err(NegotiateError::MissingField("transferFormats"))
            );
        }

        #[test]
        fn transport_entries_are_checked_even_with_url() {
            assert_eq!(
                parse_negotiate_response(
                    br#"{"url":"http://x","availableTransports":[{"transport":"WebSockets"}]}"#
                ),
                Err(NegotiateError::MissingField("transferFormats"))
            );
        }
    }

    mod malformed {
        use super::*;

        #[test]
        fn not_json() {
            assert!(matches!(
                parse_negotiate_response(b"<html>"),
                Err(NegotiateError::InvalidJson(_))
            ));
        }

        #[test]
        fn wrong_type() {
            assert!(matches!(
                parse_negotiate_response(br#"{"connectionId":42,"availableTransports":[]}"#),
                Err(NegotiateError::InvalidJson(_))
            ));
        }

        #[test]
        fn empty_body() {
            assert!(matches!(
                parse_negotiate_response(b""),
                Err(NegotiateError::InvalidJson(_))
            ));
        }
    }

    mod write {
        use super::*;

        #[test]
        fn empty_response_still_has_transport_array() -> Result<(), NegotiateError> {
            let json = write_negotiate_response(&NegotiationResponse::default())?;
            assert_eq!(json, br#"{"availableTransports":[]}"#.to_vec());
            Ok(())
        }

        #[test]
        fn offer_round_trips() -> Result<(), NegotiateError> {
            let response = NegotiationResponse::offer(
                "abc",
                vec![
                    AvailableTransport::new(TransportType::WebSockets, TransferFormats::ALL),
                    AvailableTransport::new(TransportType::LongPolling, TransferFormats::TEXT),
                ],
            );

            let json = write_negotiate_response(&response)?;
            assert_eq!(
                core::str::from_utf8(&json).ok(),
                Some(
                    r#"{"connectionId":"abc","availableTransports":[{"transport":"WebSockets","transferFormats":["Text","Binary"]},{"transport":"LongPolling","transferFormats":["Text"]}]}"#
                )
            );
            assert_eq!(parse_negotiate_response(&json)?, response);
            Ok(())
        }

        #[test]
        fn redirect_round_trips() -> Result<(), NegotiateError> {
            let response =
                NegotiationResponse::redirect("https://example.com", Some("token".into()));
            let json = write_negotiate_response(&response)?;
            assert_eq!(parse_negotiate_response(&json)?, response);
            Ok(())
        }
    }
}
