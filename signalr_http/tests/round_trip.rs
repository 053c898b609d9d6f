//! Integration tests for the HTTP transports.
//!
//! A small hyper server echoes posted messages back through either a
//! long-polling `GET` or an open event stream.

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
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::{Method, Request, Response, StatusCode, body::Frame};
use signalr_core::{
    Message, TransferFormat, Transport, TransportError,
    framing::sse,
    transport::{events, factory::TransportOptions},
};
use signalr_http::{
    LongPollingConfig, LongPollingTransport, ReqwestHttpClient, ServerSentEventsTransport,
};
use testresult::TestResult;
use tokio::{
    net::TcpListener,
    sync::{Notify, mpsc},
};
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
    queued: Mutex<Vec<u8>>,
    notify: Notify,
    deleted: AtomicBool,
    polls: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    authorization: Mutex<Vec<String>>,
}

fn full(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()).boxed_unsync())
        .expect("valid response")
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    hub: Arc<Hub>,
) -> Result<Response<Body>, Infallible> {
    if let Some(auth) = req.headers().get("authorization").and_then(|v| v.to_str().ok()) {
        hub.authorization.lock().expect("lock").push(auth.to_string());
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = match (&method, path.as_str()) {
        (&Method::GET, "/lp") => {
            hub.polls.fetch_add(1, Ordering::SeqCst);
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
        (&Method::POST, "/lp") => {
            let body = req.into_body().collect().await.expect("body").to_bytes();
            hub.queued.lock().expect("lock").extend_from_slice(&body);
            hub.notify.notify_one();
            full(StatusCode::OK, Bytes::new())
        }
        (&Method::DELETE, "/lp") => {
            hub.deleted.store(true, Ordering::SeqCst);
            hub.notify.notify_one();
            full(StatusCode::ACCEPTED, Bytes::new())
        }
        (&Method::GET, "/sse") => {
            let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
            *hub.events.lock().expect("lock") = Some(tx);
            let frames = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|chunk| (Ok::<_, Infallible>(Frame::data(chunk)), rx))
            });
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/event-stream")
                .body(StreamBody::new(frames).boxed_unsync())
                .expect("valid response")
        }
        (&Method::POST, "/sse") => {
            let body = req.into_body().collect().await.expect("body").to_bytes();
            let event = sse::encode(&Message::text(body.to_vec())).expect("encodes");
            if let Some(events) = hub.events.lock().expect("lock").as_ref() {
                let _ = events.send(Bytes::from(event));
            }
            full(StatusCode::OK, Bytes::new())
        }
        (&Method::GET, "/unauthorized") => full(StatusCode::UNAUTHORIZED, "nope"),
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
                let service = hyper::service::service_fn(move |req| handle(req, hub.clone()));
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

fn endpoint(addr: SocketAddr, path: &str) -> TestResult<Url> {
    Ok(Url::parse(&format!("http://{addr}{path}?id=abc"))?)
}

mod long_polling {
    use super::*;

    fn options() -> TransportOptions {
        TransportOptions {
            access_token: Some("secret".into()),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn echo_round_trip() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let transport = LongPollingTransport::new(ReqwestHttpClient::new(), options());
        let (sink, events) = events(8);
        transport
            .connect(endpoint(addr, "/lp")?, TransferFormat::Text, sink)
            .await?;

        transport.send(b"hello".to_vec()).await?;
        transport.send(b"world".to_vec()).await?;

        let first = tokio::time::timeout(WAIT, events.recv()).await?;
        let second = tokio::time::timeout(WAIT, events.recv()).await?;
        assert_eq!(first.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(second.as_deref(), Some(b"world".as_slice()));

        transport.stop();
        assert!(tokio::time::timeout(WAIT, events.closed()).await?.is_none());
        assert!(hub.deleted.load(Ordering::SeqCst));
        assert!(
            hub.authorization
                .lock()
                .expect("lock")
                .iter()
                .all(|auth| auth == "Bearer secret")
        );
        Ok(())
    }

    #[tokio::test]
    async fn client_timeout_polls_again() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let config = LongPollingConfig::default().with_poll_timeout(Duration::from_millis(100));
        let transport =
            LongPollingTransport::with_config(ReqwestHttpClient::new(), options(), config);
        let (sink, events) = events(8);
        transport
            .connect(endpoint(addr, "/lp")?, TransferFormat::Text, sink)
            .await?;

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(hub.polls.load(Ordering::SeqCst) >= 3);

        let still_open = tokio::time::timeout(Duration::from_millis(50), events.closed()).await;
        assert!(still_open.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn server_close_ends_the_transport() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        hub.deleted.store(true, Ordering::SeqCst);
        let addr = start_server(hub.clone()).await?;

        let transport = LongPollingTransport::new(ReqwestHttpClient::new(), options());
        let (sink, events) = events(8);
        transport
            .connect(endpoint(addr, "/lp")?, TransferFormat::Text, sink)
            .await?;

        assert!(tokio::time::timeout(WAIT, events.closed()).await?.is_none());
        Ok(())
    }
}

mod server_sent_events {
    use super::*;

    #[tokio::test]
    async fn echo_round_trip() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub.clone()).await?;

        let transport =
            ServerSentEventsTransport::new(ReqwestHttpClient::new(), TransportOptions::default());
        let (sink, events) = events(8);
        transport
            .connect(endpoint(addr, "/sse")?, TransferFormat::Text, sink)
            .await?;

        transport.send(b"multi\nline".to_vec()).await?;
        let received = tokio::time::timeout(WAIT, events.recv()).await?;
        assert_eq!(received.as_deref(), Some(b"multi\nline".as_slice()));

        // Ending the stream closes the transport cleanly.
        hub.events.lock().expect("lock").take();
        assert!(tokio::time::timeout(WAIT, events.closed()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn stop_closes_cleanly() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub).await?;

        let transport =
            ServerSentEventsTransport::new(ReqwestHttpClient::new(), TransportOptions::default());
        let (sink, events) = events(8);
        transport
            .connect(endpoint(addr, "/sse")?, TransferFormat::Text, sink)
            .await?;

        transport.stop();
        assert!(tokio::time::timeout(WAIT, events.closed()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_stream_rejects_connect() -> TestResult {
        init_tracing();
        let hub = Arc::new(Hub::default());
        let addr = start_server(hub).await?;

        let transport =
            ServerSentEventsTransport::new(ReqwestHttpClient::new(), TransportOptions::default());
        let (sink, _events) = events(8);
        let result = transport
            .connect(endpoint(addr, "/unauthorized")?, TransferFormat::Text, sink.clone())
            .await;

        assert!(matches!(
            result,
            Err(TransportError::UnexpectedStatus { status: 401, ref body }) if body == "nope"
        ));
        assert!(!sink.is_closed());
        Ok(())
    }
}
