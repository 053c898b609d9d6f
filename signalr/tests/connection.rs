//! End-to-end tests of [`HttpConnection`] against a hyper server that
//! negotiates and then echoes over long polling.

#![allow(
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::unwrap_used,
    missing_docs,
    unreachable_pub
)]

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::UnsyncBoxBody};
use hyper::{Method, Request, Response, StatusCode};
use signalr::{
    ConnectionConfig, ConnectionError, ConnectionState, HttpConnection, HttpConnectionBuilder,
    LongPollingConfig, TransportType, TransportTypes,
};
use signalr_core::{
    negotiate::{AvailableTransport, NegotiationResponse},
    transport::TransferFormats,
};
use testresult::TestResult;
use tokio::{net::TcpListener, sync::Notify};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);
const SERVER_POLL: Duration = Duration::from_millis(500);

static TRACING: OnceLock<()> = OnceLock::new();

fn init_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

type Body = UnsyncBoxBody<Bytes, Infallible>;

/// Server-side state for one test.
#[derive(Default)]
struct Hub {
    /// When set, `/chat/negotiate` redirects to `/other` with this token.
    redirect_token: Option<String>,
    queued: Mutex<Vec<u8>>,
    notify: Notify,
    deleted: AtomicBool,
    requests: Mutex<Vec<(Method, String, Option<String>)>>,
}

fn full(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()).boxed_unsync())
        .expect("valid response")
}

fn offer() -> String {
    serde_json::to_string(&NegotiationResponse::offer(
        "conn-1",
        vec![AvailableTransport::new(
            TransportType::LongPolling,
            TransferFormats::ALL,
        )],
    ))
    .expect("serializes")
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    hub: Arc<Hub>,
    addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let auth = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    hub.requests
        .lock()
        .expect("lock")
        .push((method.clone(), path.clone(), auth));

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/chat/negotiate") => match &hub.redirect_token {
            Some(token) => {
                let redirect = NegotiationResponse::redirect(
                    format!("http://{addr}/other"),
                    Some(token.clone()),
                );
                full(
                    StatusCode::OK,
                    serde_json::to_string(&redirect).expect("serializes"),
                )
            }
            None => full(StatusCode::OK, offer()),
        },
        (&Method::POST, "/other/negotiate") => full(StatusCode::OK, offer()),
        (&Method::GET, "/chat" | "/other") => {
            if hub.deleted.load(Ordering::SeqCst) {
                return Ok(full(StatusCode::NO_CONTENT, Bytes::new()));
            }
            let _ = tokio::time::timeout(SERVER_POLL, hub.notify.notified()).await;
            if hub.deleted.load(Ordering::SeqCst) {
                return Ok(full(StatusCode::NO_CONTENT, Bytes::new()));
            }
            let body = std::mem::take(&mut *hub.queued.lock().expect("lock"));
            full(StatusCode::OK, body)
        }
        (&Method::POST, "/chat" | "/other") => {
            let body = req.into_body().collect().await.expect("body").to_bytes();
            hub.queued.lock().expect("lock").extend_from_slice(&body);
            hub.notify.notify_one();
            full(StatusCode::OK, Bytes::new())
        }
        (&Method::DELETE, "/chat" | "/other") => {
            hub.deleted.store(true, Ordering::SeqCst);
            hub.notify.notify_one();
            full(StatusCode::ACCEPTED, Bytes::new())
        }
        _ => full(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn start_server(hub: Arc<Hub>) -> TestResult<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                break;
            };
            let hub = hub.clone();
            tokio::spawn(async move {
                use hyper_util::rt::TokioIo;

                let io = TokioIo::new(tcp);
                let service =
                    hyper::service::service_fn(move |req| handle(req, hub.clone(), addr));
                let builder = hyper_util::server::conn::auto::Builder::new(
                    hyper_util::rt::TokioExecutor::new(),
                );
                if let Err(e) = builder.serve_connection(io, service).await {
                    tracing::debug!("HTTP connection ended: {e}");
                }
            });
        }
    });

    Ok(addr)
}

fn connect(addr: SocketAddr, config: ConnectionConfig) -> TestResult<HttpConnection> {
    Ok(
        HttpConnectionBuilder::new(Url::parse(&format!("http://{addr}/chat"))?)
            .config(config.with_retry_delay(Duration::from_millis(10)))
            .long_polling(LongPollingConfig::default().with_poll_timeout(Duration::from_secs(2)))
            .build(),
    )
}

/// Records every `on_close` invocation.
#[derive(Clone, Default)]
struct Closes {
    seen: Arc<Mutex<Vec<Option<String>>>>,
    notify: Arc<Notify>,
}

impl Closes {
    fn watch(&self, connection: &HttpConnection) {
        let closes = self.clone();
        connection.on_close(move |err| {
            closes
                .seen
                .lock()
                .expect("lock")
                .push(err.map(ToString::to_string));
            closes.notify.notify_one();
        });
    }

    async fn wait(&self) -> TestResult<Vec<Option<String>>> {
        tokio::time::timeout(WAIT, self.notify.notified()).await?;
        Ok(self.seen.lock().expect("lock").clone())
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn negotiates_then_echoes_over_long_polling() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let connection = connect(addr, ConnectionConfig::default())?;
        let closes = Closes::default();
        closes.watch(&connection);

        connection.start(CancellationToken::new()).await?;
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.connection_id().as_deref(), Some("conn-1"));
        assert_eq!(connection.transport_type(), Some(TransportType::LongPolling));

        connection.send(b"ping".to_vec()).await?;
        let echoed = tokio::time::timeout(WAIT, connection.recv()).await??;
        assert_eq!(echoed.as_deref(), Some(b"ping".as_slice()));

        connection.stop().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(closes.wait().await?, vec![None]);
        assert!(hub.deleted.load(Ordering::SeqCst));

        let requests = hub.requests.lock().expect("lock").clone();
        assert_eq!(requests[0].0, Method::POST);
        assert_eq!(requests[0].1, "/chat/negotiate");
        Ok(())
    }

    #[tokio::test]
    async fn server_close_ends_the_session() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let connection = connect(addr, ConnectionConfig::default())?;
        let closes = Closes::default();
        closes.watch(&connection);
        connection.start(CancellationToken::new()).await?;

        hub.deleted.store(true, Ordering::SeqCst);
        hub.notify.notify_one();

        assert_eq!(closes.wait().await?, vec![None]);
        assert!(tokio::time::timeout(WAIT, connection.recv()).await??.is_none());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn restarts_after_stop() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let connection = connect(addr, ConnectionConfig::default())?;
        connection.start(CancellationToken::new()).await?;
        connection.stop().await;

        hub.deleted.store(false, Ordering::SeqCst);
        connection.start(CancellationToken::new()).await?;
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.send(b"again".to_vec()).await?;
        let echoed = tokio::time::timeout(WAIT, connection.recv()).await??;
        assert_eq!(echoed.as_deref(), Some(b"again".as_slice()));

        connection.stop().await;
        Ok(())
    }
}

mod negotiation {
    use super::*;

    #[tokio::test]
    async fn redirect_token_reaches_the_transport() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub {
            redirect_token: Some("redirected".into()),
            ..Hub::default()
        });
        let addr = start_server(hub.clone()).await?;

        let connection = connect(addr, ConnectionConfig::default().with_access_token("initial"))?;
        connection.start(CancellationToken::new()).await?;
        connection.stop().await;

        let requests = hub.requests.lock().expect("lock").clone();
        assert_eq!(requests[0].1, "/chat/negotiate");
        assert_eq!(requests[0].2.as_deref(), Some("Bearer initial"));
        assert_eq!(requests[1].1, "/other/negotiate");

        let transport_requests: Vec<_> = requests
            .iter()
            .filter(|(_, path, _)| path == "/other")
            .collect();
        assert!(!transport_requests.is_empty());
        assert!(
            transport_requests
                .iter()
                .all(|(_, _, auth)| auth.as_deref() == Some("Bearer redirected"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn no_common_transport_faults() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub).await?;

        let connection = connect(
            addr,
            ConnectionConfig::default().with_transports(TransportTypes::WEB_SOCKETS),
        )?;
        let result = connection.start(CancellationToken::new()).await;

        assert!(matches!(result, Err(ConnectionError::NoTransport(_))));
        assert_eq!(connection.state(), ConnectionState::Faulted);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_start_returns_to_disconnected() -> TestResult {
        init_tracing();
        let connection = connect(
            SocketAddr::from(([127, 0, 0, 1], 9)),
            ConnectionConfig::default().with_connect_retries(100),
        )?;
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let result = tokio::time::timeout(WAIT, connection.start(cancel)).await?;
        assert!(matches!(result, Err(ConnectionError::Cancelled)));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        Ok(())
    }
}
