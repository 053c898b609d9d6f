//! Transport selection.
//!
//! Candidates are tried in [`TransportType::PRIORITY`] order. A transport is
//! eligible when the client requested it, the server advertised it with the
//! requested transfer format, and (for WebSockets) the platform supports it.

use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use thiserror::Error;

use super::{Transport, TransferFormat, TransportType, TransportTypes};
use crate::negotiate::{AvailableTransport, NegotiationResponse};

/// Settings handed to each transport at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Bearer token for transport requests.
    pub access_token: Option<String>,

    /// Extra headers for HTTP-based requests.
    pub headers: Vec<(String, String)>,
}

/// Problem constructing a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The transport cannot run on this platform.
    #[error("{0} is not supported on this platform")]
    PlatformNotSupported(TransportType),
}

/// No transport satisfies both the client's request and the server's offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no requested transports available on the server")]
pub struct NoTransportAvailable;

/// Constructs concrete transports by type.
pub trait TransportBuilder: Send + Sync + 'static {
    /// The transport type produced.
    type Transport: Transport;

    /// Build a transport of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::PlatformNotSupported`] if the kind cannot run
    /// here.
    fn build(
        &self,
        transport: TransportType,
        options: &TransportOptions,
    ) -> Result<Self::Transport, BuildError>;
}

/// Process-wide cache of whether WebSockets work on this platform.
///
/// The check runs at most once. A later construction failure can demote the
/// answer to "unsupported", after which it never changes again.
pub struct WebSocketSupport {
    check: Box<dyn Fn() -> bool + Send + Sync>,
    checked: OnceLock<bool>,
    demoted: AtomicBool,
}

impl WebSocketSupport {
    /// A capability backed by the given check.
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            check: Box::new(check),
            checked: OnceLock::new(),
            demoted: AtomicBool::new(false),
        }
    }

    /// The shared capability for native targets, where WebSockets are always
    /// available until a construction failure says otherwise.
    #[must_use]
    pub fn native() -> Arc<Self> {
        static NATIVE: OnceLock<Arc<WebSocketSupport>> = OnceLock::new();
        NATIVE.get_or_init(|| Arc::new(Self::new(|| true))).clone()
    }

    /// Whether WebSockets can be used.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !self.demoted.load(Ordering::Acquire) && *self.checked.get_or_init(|| (self.check)())
    }

    /// Permanently record that WebSockets are unavailable.
    pub fn mark_unsupported(&self) {
        if !self.demoted.swap(true, Ordering::AcqRel) {
            tracing::warn!("WebSockets marked unsupported for this process");
        }
    }
}

impl core::fmt::Debug for WebSocketSupport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebSocketSupport")
            .field("checked", &self.checked.get())
            .field("demoted", &self.demoted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Picks and builds a transport from a negotiate response.
#[derive(Debug)]
pub struct TransportFactory<B> {
    builder: B,
    websocket_support: Arc<WebSocketSupport>,
}

impl<B: TransportBuilder> TransportFactory<B> {
    /// A factory using the native WebSocket capability.
    pub fn new(builder: B) -> Self {
        Self::with_websocket_support(builder, WebSocketSupport::native())
    }

    /// A factory using an injected WebSocket capability.
    pub const fn with_websocket_support(
        builder: B,
        websocket_support: Arc<WebSocketSupport>,
    ) -> Self {
        Self {
            builder,
            websocket_support,
        }
    }

    /// The WebSocket capability in use.
    #[must_use]
    pub fn websocket_support(&self) -> &WebSocketSupport {
        &self.websocket_support
    }

    /// The transport types the server offers for `format`.
    #[must_use]
    pub fn advertised(negotiation: &NegotiationResponse, format: TransferFormat) -> TransportTypes {
        negotiation
            .available_transports
            .iter()
            .filter(|t| t.transfer_formats().contains(format))
            .filter_map(AvailableTransport::transport_type)
            .collect()
    }

    /// Select and build the highest-priority eligible transport.
    ///
    /// # Errors
    ///
    /// Returns [`NoTransportAvailable`] if no candidate is eligible or every
    /// eligible candidate is unsupported on this platform.
    pub fn create_transport(
        &self,
        requested: TransportTypes,
        negotiation: &NegotiationResponse,
        format: TransferFormat,
        options: &TransportOptions,
    ) -> Result<B::Transport, NoTransportAvailable> {
        let candidates = requested.intersection(Self::advertised(negotiation, format));

        for transport in candidates.iter() {
            if transport == TransportType::WebSockets && !self.websocket_support.is_supported() {
                tracing::debug!("skipping WebSockets: not supported on this platform");
                continue;
            }

            match self.builder.build(transport, options) {
                Ok(built) => {
                    tracing::debug!(%transport, %format, "selected transport");
                    return Ok(built);
                }
                Err(BuildError::PlatformNotSupported(kind)) => {
                    tracing::debug!(%kind, "transport not supported on this platform");
                    if kind == TransportType::WebSockets {
                        self.websocket_support.mark_unsupported();
                    }
                }
            }
        }

        tracing::warn!(?requested, "no requested transports available on the server");
        Err(NoTransportAvailable)
    }
}
