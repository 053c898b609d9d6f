//! The client-facing connection.
//!
//! ```text
//!                start()                       transport closed / stop()
//!  Disconnected ─────────► Connecting ──ok──► Connected ─────────────────► Disconnected
//!        ▲                     │
//!        └──── cancelled ──────┤
//!                              └── retries exhausted / no transport ──► Faulted
//! ```
//!
//! `start` negotiates (following redirects), picks a transport, and opens it.
//! Failed attempts are retried with a fixed delay; a configuration problem
//! such as no usable transport is not retried. `Faulted` is terminal.
//!
//! Once connected, two tasks run inside a [`DuplexConnectionContext`]:
//!
//! * the **transport task** moves messages from the application pipe to
//!   [`Transport::send`] in order, and from the transport's events into the
//!   application pipe;
//! * the **application task** represents the caller and ends when the
//!   connection is stopped.
//!
//! A watcher waits for `stop`, for the transport to close, or for the server
//! timeout, runs the graceful shutdown, and then fires the `on_close`
//! callbacks exactly once for the session.

pub mod config;

use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::time::Duration;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use futures::{
    FutureExt,
    future::{self, BoxFuture, Either, Shared},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use self::config::ConnectionConfig;
use crate::{
    context::{DisposeError, DuplexConnectionContext, ShutdownMode, TaskResult},
    http_client::{HttpClient, HttpError, HttpRequest},
    negotiate::{AvailableTransport, NegotiateError, NegotiationResponse, parse_negotiate_response},
    pipe::{self, CompletionError, DuplexPipe, PipeClosed, PipeReader, PipeWriter},
    timeout::{TimedOut, Timeout, TimeoutTokio},
    transport::{
        self, TransferFormats, Transport, TransportError, TransportEvents, TransportType, TransportTypes,
        factory::{NoTransportAvailable, TransportBuilder, TransportFactory},
    },
};

/// Negotiate redirects followed before giving up.
pub const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Where a [`Connection`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected. `start` may be called.
    Disconnected,

    /// `start` is in progress.
    Connecting,

    /// A transport is open.
    Connected,

    /// Connecting failed for good. A new connection is required.
    Faulted,
}

/// Connection-level failure.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The operation was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled,

    /// No transport satisfies both sides.
    #[error(transparent)]
    NoTransport(#[from] NoTransportAvailable),

    /// The negotiate document is malformed.
    #[error(transparent)]
    Negotiate(#[from] NegotiateError),

    /// The negotiate endpoint answered with an unexpected status.
    #[error("unexpected status code returned from negotiate: {status} {body}")]
    UnexpectedStatus {
        /// The HTTP status code.
        status: u16,

        /// The response body, lossily decoded.
        body: String,
    },

    /// The negotiate request failed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Negotiation or connecting took too long.
    #[error(transparent)]
    TimedOut(#[from] TimedOut),

    /// The negotiate endpoint kept redirecting.
    #[error("negotiate redirection limit exceeded")]
    TooManyRedirects,

    /// A negotiate redirect named an unusable URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Negotiation can only be skipped when WebSockets is the sole
    /// requested transport.
    #[error("negotiation can only be skipped when using WebSockets directly")]
    SkipNegotiationRequiresWebSockets,

    /// The call is not valid in the current state.
    #[error("invalid operation in state {0:?}")]
    InvalidState(ConnectionState),

    /// Every connect attempt failed.
    #[error("connect failed after {attempts} attempts: {source}")]
    Faulted {
        /// Attempts made, including the first.
        attempts: u32,

        /// The last attempt's error.
        #[source]
        source: Box<ConnectionError>,
    },

    /// The application pipe is closed.
    #[error(transparent)]
    PipeClosed(#[from] PipeClosed),

    /// Nothing was received within the server timeout.
    #[error("server timeout of {0:?} elapsed without receiving a message")]
    ServerTimeout(Duration),

    /// The connection closed with an error from one of its tasks.
    #[error("connection closed: {0}")]
    Closed(CompletionError),
}

impl ConnectionError {
    /// Whether another connect attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled
                | Self::NoTransport(_)
                | Self::TooManyRedirects
                | Self::InvalidUrl(_)
                | Self::SkipNegotiationRequiresWebSockets
                | Self::InvalidState(_)
                | Self::Faulted { .. }
        )
    }
}

impl From<CompletionError> for ConnectionError {
    fn from(err: CompletionError) -> Self {
        match err.downcast_ref::<TransportError>() {
            Some(transport) => Self::Transport(transport.clone()),
            None => Self::Closed(err),
        }
    }
}

/// How the transport task's send loop ended.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// The application finished writing and everything was sent.
    Ok,

    /// The transport stopped accepting messages.
    ConnectionClosed,

    /// Sending failed.
    Failed(CompletionError),
}

type CloseCallback = Arc<dyn Fn(Option<&ConnectionError>) + Send + Sync>;

type Closed = Shared<BoxFuture<'static, Option<ConnectionError>>>;

#[derive(Clone)]
struct Session {
    transport: Arc<dyn Transport>,
    context: Arc<DuplexConnectionContext>,
    stop: CancellationToken,
    closed: Closed,
}

struct SharedState {
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    on_close: Mutex<Vec<CloseCallback>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
            on_close: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> ConnectionState {
        *self.state()
    }

    fn set(&self, state: ConnectionState) {
        *self.state() = state;
    }

    fn session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, error: Option<&ConnectionError>) {
        {
            let mut state = self.state();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
            }
        }

        let callbacks = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(error);
        }
    }
}

struct Established {
    transport: Arc<dyn Transport>,
    events: TransportEvents,
    connection_id: Option<String>,
}

struct Negotiated {
    url: Url,
    access_token: Option<String>,
    response: NegotiationResponse,
}

/// A logical connection to a SignalR endpoint.
pub struct Connection<H, B, O = TimeoutTokio> {
    url: Url,
    http: H,
    factory: TransportFactory<B>,
    config: ConnectionConfig,
    timeout: O,
    shared: Arc<SharedState>,
}

impl<H: HttpClient, B: TransportBuilder> Connection<H, B> {
    /// A connection to the endpoint at `url`.
    pub fn new(url: Url, http: H, factory: TransportFactory<B>, config: ConnectionConfig) -> Self {
        Self::with_timeout(url, http, factory, config, TimeoutTokio)
    }
}

impl<H: HttpClient, B: TransportBuilder, O: Timeout> Connection<H, B, O> {
    /// A connection using a custom timeout strategy.
    pub fn with_timeout(
        url: Url,
        http: H,
        factory: TransportFactory<B>,
        config: ConnectionConfig,
        timeout: O,
    ) -> Self {
        Self {
            url,
            http,
            factory,
            config,
            timeout,
            shared: Arc::new(SharedState::new()),
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.current()
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The connection id from the most recent negotiation.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.shared
            .session()
            .map(|session| session.context.connection_id().into())
            .filter(|id: &String| !id.is_empty())
    }

    /// The transport of the current or most recent session.
    #[must_use]
    pub fn transport_type(&self) -> Option<TransportType> {
        self.shared
            .session()
            .map(|session| session.transport.transport_type())
    }

    /// Register a callback fired once whenever a connected session ends,
    /// with the closing error if there was one.
    pub fn on_close(&self, callback: impl Fn(Option<&ConnectionError>) + Send + Sync + 'static) {
        self.shared
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Negotiate, select a transport, and connect.
    ///
    /// # Errors
    ///
    /// * [`ConnectionError::InvalidState`] unless disconnected.
    /// * [`ConnectionError::Cancelled`] if `cancel` fires first; the
    ///   connection returns to `Disconnected`.
    /// * A non-retryable error such as [`ConnectionError::NoTransport`], or
    ///   [`ConnectionError::Faulted`] once retries are exhausted; the
    ///   connection becomes `Faulted`.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ConnectionError> {
        {
            let mut state = self.shared.state();
            if *state != ConnectionState::Disconnected {
                return Err(ConnectionError::InvalidState(*state));
            }
            *state = ConnectionState::Connecting;
        }

        let backoff = self.config.backoff();
        let mut attempts = 0_u32;

        loop {
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ConnectionError::Cancelled),
                result = self.establish() => result,
            };

            let err = match outcome {
                Ok(established) => return self.activate(established).await,
                Err(err) => err,
            };

            if matches!(err, ConnectionError::Cancelled) {
                tracing::debug!("connect cancelled");
                self.shared.set(ConnectionState::Disconnected);
                return Err(err);
            }

            if !err.is_retryable() {
                tracing::error!("connect failed: {err}");
                self.shared.set(ConnectionState::Faulted);
                return Err(err);
            }

            if attempts > self.config.connect_retries {
                tracing::error!(attempts, "connect failed: {err}");
                self.shared.set(ConnectionState::Faulted);
                return Err(ConnectionError::Faulted {
                    attempts,
                    source: Box::new(err),
                });
            }

            let delay = backoff.next_delay();
            tracing::warn!(attempts, ?delay, "connect attempt failed, retrying: {err}");

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.shared.set(ConnectionState::Disconnected);
                    return Err(ConnectionError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Queue `data` for delivery. Messages go out in call order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if never connected and
    /// [`ConnectionError::PipeClosed`] once the connection has closed.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        let session = self.require_session()?;
        session.context.application().output.write(data).await?;
        Ok(())
    }

    /// Like [`send`](Self::send), abandoning only this call if `cancel`
    /// fires first.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Cancelled`] if cancelled, or as
    /// [`send`](Self::send).
    pub async fn send_with_cancel(
        &self,
        data: Vec<u8>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ConnectionError::Cancelled),
            result = self.send(data) => result,
        }
    }

    /// The next inbound payload, or `None` once the connection closed
    /// cleanly and everything received has been read.
    ///
    /// # Errors
    ///
    /// Returns the closing error once buffered payloads are drained.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>, ConnectionError> {
        let session = self.require_session()?;
        Ok(session.context.application().input.read().await?)
    }

    /// Stop the connection and wait for shutdown to finish.
    ///
    /// Cancels outstanding sends, stops the transport, and waits for the
    /// graceful shutdown. Calling it again, or when not connected, does
    /// nothing.
    pub async fn stop(&self) {
        let Some(session) = self.shared.session() else {
            return;
        };

        session.stop.cancel();
        session.transport.stop();
        let _ = session.closed.await;
    }

    fn require_session(&self) -> Result<Session, ConnectionError> {
        self.shared
            .session()
            .ok_or_else(|| ConnectionError::InvalidState(self.state()))
    }

    async fn establish(&self) -> Result<Established, ConnectionError> {
        let format = self.config.transfer_format;

        let (url, connection_id, transport) = if self.config.skip_negotiation {
            if self.config.transports != TransportTypes::WEB_SOCKETS {
                return Err(ConnectionError::SkipNegotiationRequiresWebSockets);
            }

            let direct = NegotiationResponse::offer(
                "",
                vec![AvailableTransport::new(TransportType::WebSockets, TransferFormats::ALL)],
            );
            let transport = self.factory.create_transport(
                TransportTypes::WEB_SOCKETS,
                &direct,
                format,
                &self.config.transport_options(None),
            )?;
            (self.url.clone(), None, transport)
        } else {
            let negotiated = self.negotiate().await?;
            let options = self
                .config
                .transport_options(negotiated.access_token.as_deref());
            let transport = self.factory.create_transport(
                self.config.transports,
                &negotiated.response,
                format,
                &options,
            )?;
            let id = negotiated
                .response
                .connection_id
                .ok_or(NegotiateError::MissingField("connectionId"))?;
            (connect_url(&negotiated.url, &id), Some(id), transport)
        };

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (sink, events) = transport::events(self.config.pipe_capacity);

        tracing::debug!(transport = %transport.transport_type(), %format, %url, "connecting");
        self.timeout
            .timeout(
                self.config.connect_timeout,
                transport.connect(url, format, sink),
            )
            .await??;

        Ok(Established {
            transport,
            events,
            connection_id,
        })
    }

    async fn negotiate(&self) -> Result<Negotiated, ConnectionError> {
        let mut url = self.url.clone();
        let mut access_token = self.config.access_token.clone();

        for _ in 0..=MAX_NEGOTIATE_REDIRECTS {
            let request = HttpRequest::post(negotiate_url(&url), Vec::new())
                .with_headers(&self.config.headers)
                .with_bearer(access_token.as_deref());

            tracing::debug!(url = %request.url, "sending negotiate request");
            let response = self
                .timeout
                .timeout(self.config.negotiate_timeout, self.http.send(request))
                .await??;

            if response.status != 200 {
                return Err(ConnectionError::UnexpectedStatus {
                    status: response.status,
                    body: response.body_text(),
                });
            }

            let negotiation = parse_negotiate_response(&response.body)?;
            let Some(redirect) = negotiation.url.clone() else {
                return Ok(Negotiated {
                    url,
                    access_token,
                    response: negotiation,
                });
            };

            url = Url::parse(&redirect).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;
            if negotiation.access_token.is_some() {
                access_token = negotiation.access_token;
            }
            tracing::debug!(%url, "negotiate redirected");
        }

        Err(ConnectionError::TooManyRedirects)
    }

    async fn activate(&self, established: Established) -> Result<(), ConnectionError> {
        let Established {
            transport,
            events,
            connection_id,
        } = established;

        let (application, transport_ends) = pipe::duplex(self.config.pipe_capacity);
        let context = Arc::new(DuplexConnectionContext::new(
            connection_id.unwrap_or_default(),
            application,
            transport_ends.clone(),
        ));

        let stop = CancellationToken::new();
        let transport_done = CancellationToken::new();
        let expired = CancellationToken::new();

        let application_task = tokio::spawn({
            let stop = stop.clone();
            async move {
                stop.cancelled().await;
                Ok(())
            }
        });
        let transport_task = tokio::spawn(run_transport(
            transport.clone(),
            events,
            transport_ends,
            context.clone(),
            transport_done.clone(),
        ));

        if let Err(err) = context.start(application_task, transport_task).await {
            transport.stop();
            self.shared.set(ConnectionState::Faulted);
            return Err(ConnectionError::Closed(CompletionError::new(err)));
        }

        if let Some(limit) = self.config.server_timeout {
            context.on_heartbeat(
                |(context, expired, limit): &(Weak<DuplexConnectionContext>, CancellationToken, Duration)| {
                    let idle = context
                        .upgrade()
                        .is_some_and(|context| context.last_seen().elapsed() > *limit);
                    if idle {
                        expired.cancel();
                    }
                },
                (Arc::downgrade(&context), expired.clone(), limit),
            );
        }

        tokio::spawn({
            let context = context.clone();
            let stop = stop.clone();
            let interval = self.config.heartbeat_interval;
            async move { context.run_heartbeat(interval, stop).await }
        });

        {
            // Held until the session is visible so the watcher cannot
            // finish before the state says Connected.
            let mut state = self.shared.state();

            let watcher = tokio::spawn(watch(
                self.shared.clone(),
                transport.clone(),
                context.clone(),
                stop.clone(),
                transport_done,
                expired,
                self.config.server_timeout,
            ));
            let closed = watcher
                .map(|joined| {
                    joined.unwrap_or_else(|err| Some(ConnectionError::Closed(CompletionError::new(err))))
                })
                .boxed()
                .shared();

            *self
                .shared
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Session {
                transport,
                context,
                stop,
                closed,
            });
            *state = ConnectionState::Connected;
        }

        tracing::info!(connection_id = ?self.connection_id(), "connected");
        Ok(())
    }
}

impl<H, B, O> Drop for Connection<H, B, O> {
    fn drop(&mut self) {
        if let Some(session) = self.shared.session() {
            session.stop.cancel();
            session.transport.stop();
        }
    }
}

impl<H, B, O> core::fmt::Debug for Connection<H, B, O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url.as_str())
            .field("state", &self.shared.current())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn negotiate_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/negotiate", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}

fn connect_url(base: &Url, connection_id: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("id", connection_id);
    url
}

async fn watch(
    shared: Arc<SharedState>,
    transport: Arc<dyn Transport>,
    context: Arc<DuplexConnectionContext>,
    stop: CancellationToken,
    transport_done: CancellationToken,
    expired: CancellationToken,
    server_timeout: Option<Duration>,
) -> Option<ConnectionError> {
    let (timed_out, transport_closed) = tokio::select! {
        () = stop.cancelled() => (false, false),
        () = transport_done.cancelled() => (false, true),
        () = expired.cancelled() => (true, false),
    };

    transport.stop();
    let dispose = context.dispose(ShutdownMode::Graceful, CancellationToken::new());

    let result = if transport_closed {
        // The application task is released only after the transport's outcome
        // is in the pipe, so a pending `recv` sees its error.
        let dispose = core::pin::pin!(dispose);
        let written = core::pin::pin!(context.transport().output.completed());
        match future::select(dispose, written).await {
            Either::Left((result, _)) => {
                stop.cancel();
                result
            }
            Either::Right(((), dispose)) => {
                stop.cancel();
                dispose.await
            }
        }
    } else {
        stop.cancel();
        dispose.await
    };

    let error = match (timed_out, server_timeout, result) {
        (true, Some(limit), _) => Some(ConnectionError::ServerTimeout(limit)),
        (_, _, Ok(())) => None,
        (_, _, Err(DisposeError::Failed(err))) => Some(ConnectionError::from(err)),
        (_, _, Err(DisposeError::Cancelled)) => Some(ConnectionError::Cancelled),
    };

    match &error {
        Some(err) => tracing::info!(connection_id = %context.connection_id(), "connection closed: {err}"),
        None => tracing::info!(connection_id = %context.connection_id(), "connection closed"),
    }

    shared.finish(error.as_ref());
    error
}

async fn run_transport(
    transport: Arc<dyn Transport>,
    events: TransportEvents,
    ends: DuplexPipe,
    context: Arc<DuplexConnectionContext>,
    done: CancellationToken,
) -> TaskResult {
    let _done = done.drop_guard();

    let sending = send_loop(transport.as_ref(), &ends.input);
    let receiving = receive_loop(&events, &ends.output, &context);
    tokio::pin!(sending, receiving);

    let closed = tokio::select! {
        closed = &mut receiving => closed,
        outcome = &mut sending => {
            tracing::trace!(?outcome, "send loop finished");
            transport.stop();
            let closed = receiving.await;
            if let SendOutcome::Failed(err) = outcome {
                return Err(err);
            }
            closed
        }
    };

    closed.map_or(Ok(()), |err| Err(CompletionError::new(err)))
}

async fn send_loop(transport: &dyn Transport, input: &PipeReader) -> SendOutcome {
    loop {
        let data = match input.read().await {
            Ok(Some(data)) => data,
            Ok(None) => return SendOutcome::Ok,
            Err(err) => return SendOutcome::Failed(err),
        };

        match transport.send(data).await {
            Ok(()) => {}
            Err(TransportError::Stopped | TransportError::NotConnected) => {
                return SendOutcome::ConnectionClosed;
            }
            Err(err) => {
                tracing::warn!("send failed: {err}");
                return SendOutcome::Failed(CompletionError::new(err));
            }
        }
    }
}

async fn receive_loop(
    events: &TransportEvents,
    output: &PipeWriter,
    context: &DuplexConnectionContext,
) -> Option<TransportError> {
    while let Some(data) = events.recv().await {
        context.touch();
        if output.write(data).await.is_err() {
            tracing::trace!("application stopped reading, dropping inbound message");
        }
    }
    events.closed().await
}
