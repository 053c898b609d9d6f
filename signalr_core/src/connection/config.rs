//! Connection settings.

use alloc::{string::String, vec::Vec};
use core::time::Duration;

use crate::{
    backoff::Backoff,
    transport::{TransferFormat, TransportTypes, factory::TransportOptions},
};

/// Default number of connect retries after the first attempt.
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// Default delay between connect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default number of messages buffered in each pipe direction.
pub const DEFAULT_PIPE_CAPACITY: usize = 64;

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Default limit on a single negotiate round trip.
pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(100);

/// Default limit on opening a transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a [`Connection`](super::Connection) negotiates, connects, and
/// buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Transports the client is willing to use.
    pub transports: TransportTypes,

    /// The transfer format to request.
    pub transfer_format: TransferFormat,

    /// Connect straight to the URL over WebSockets without negotiating.
    pub skip_negotiation: bool,

    /// Retries after a failed first connect attempt.
    pub connect_retries: u32,

    /// Delay between connect attempts.
    pub retry_delay: Duration,

    /// Messages buffered in each direction of the duplex pipe.
    pub pipe_capacity: usize,

    /// How often heartbeat callbacks run while connected.
    pub heartbeat_interval: Duration,

    /// Close the connection when nothing has been received for this long.
    pub server_timeout: Option<Duration>,

    /// Limit on each negotiate request.
    pub negotiate_timeout: Duration,

    /// Limit on opening the transport.
    pub connect_timeout: Duration,

    /// Bearer token sent with negotiate and transport requests.
    pub access_token: Option<String>,

    /// Extra headers sent with HTTP requests.
    pub headers: Vec<(String, String)>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transports: TransportTypes::ALL,
            transfer_format: TransferFormat::Text,
            skip_negotiation: false,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            server_timeout: None,
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            access_token: None,
            headers: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    /// Restrict the transports the client will use.
    #[must_use]
    pub const fn with_transports(mut self, transports: TransportTypes) -> Self {
        self.transports = transports;
        self
    }

    /// Request a transfer format.
    #[must_use]
    pub const fn with_transfer_format(mut self, format: TransferFormat) -> Self {
        self.transfer_format = format;
        self
    }

    /// Skip negotiation and connect over WebSockets directly.
    #[must_use]
    pub const fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    /// Set how many times a failed connect is retried.
    #[must_use]
    pub const fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the delay between connect attempts.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-direction pipe capacity.
    #[must_use]
    pub const fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Set the heartbeat period. Periods under a millisecond tick every
    /// millisecond.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Close the connection after `timeout` without inbound traffic.
    #[must_use]
    pub const fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    /// Set the negotiate request timeout.
    #[must_use]
    pub const fn with_negotiate_timeout(mut self, timeout: Duration) -> Self {
        self.negotiate_timeout = timeout;
        self
    }

    /// Set the transport connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Send a bearer token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Add a header to every HTTP request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The retry schedule for connect attempts.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::fixed(self.retry_delay)
    }

    /// Transport construction settings, using `access_token` if given and
    /// the configured token otherwise.
    #[must_use]
    pub fn transport_options(&self, access_token: Option<&str>) -> TransportOptions {
        TransportOptions {
            access_token: access_token
                .map(String::from)
                .or_else(|| self.access_token.clone()),
            headers: self.headers.clone(),
        }
    }
}
