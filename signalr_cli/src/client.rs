//! Interactive client session.

use anyhow::{Context, Result, bail};
use signalr::{
    ConnectionConfig, HttpConnectionBuilder, TransferFormat, TransportType, TransportTypes,
};
use signalr_core::{
    framing::{ParseOutcome, record_separator},
    handshake::{self, HandshakeRequest},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Arguments for a client session.
#[derive(Debug, clap::Args)]
pub(crate) struct ClientArgs {
    /// Hub URL, e.g. `http://localhost:5000/chat`
    pub(crate) url: Url,

    /// Transports to allow, in any order (repeatable). Defaults to all
    #[arg(short, long = "transport")]
    pub(crate) transports: Vec<TransportType>,

    /// Transfer format requested from the transport
    #[arg(short, long, default_value = "text")]
    pub(crate) format: TransferFormat,

    /// Bearer token sent with every request
    #[arg(long, env = "SIGNALR_ACCESS_TOKEN")]
    pub(crate) access_token: Option<String>,

    /// Extra request header as `name=value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub(crate) headers: Vec<(String, String)>,

    /// Connect the WebSocket directly without negotiating
    #[arg(long)]
    pub(crate) skip_negotiation: bool,

    /// Extra connect attempts after the first
    #[arg(long, default_value = "3")]
    pub(crate) retries: u32,
}

impl ClientArgs {
    fn config(&self) -> ConnectionConfig {
        let transports = if self.transports.is_empty() {
            TransportTypes::ALL
        } else {
            self.transports.iter().copied().collect()
        };

        let mut config = ConnectionConfig::default()
            .with_transports(transports)
            .with_transfer_format(self.format)
            .with_skip_negotiation(self.skip_negotiation)
            .with_connect_retries(self.retries);
        if let Some(token) = &self.access_token {
            config = config.with_access_token(token.clone());
        }
        for (name, value) in &self.headers {
            config = config.with_header(name.clone(), value.clone());
        }
        config
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got {raw:?}");
    };
    if name.trim().is_empty() {
        bail!("header name is empty in {raw:?}");
    }
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Splits inbound bytes into records, consuming the handshake response first.
#[derive(Debug, Default)]
struct Inbox {
    buffer: Vec<u8>,
    handshake_done: bool,
}

impl Inbox {
    /// Append `bytes` and return every record now complete.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        if !self.handshake_done {
            match handshake::parse_handshake_response(&self.buffer)? {
                ParseOutcome::Complete { value, consumed } => {
                    tracing::info!(minor_version = ?value.minor_version, "handshake accepted");
                    self.buffer.drain(..consumed);
                    self.handshake_done = true;
                }
                ParseOutcome::Incomplete { .. } => return Ok(Vec::new()),
            }
        }

        let mut records = Vec::new();
        let mut consumed = 0;
        while let ParseOutcome::Complete { value, consumed: used } =
            record_separator::parse(self.buffer.get(consumed..).unwrap_or_default())
        {
            records.push(String::from_utf8_lossy(value).into_owned());
            consumed += used;
        }
        self.buffer.drain(..consumed);
        Ok(records)
    }
}

/// Connect, handshake, and relay stdin and stdout until `token` fires, stdin
/// ends, or the server closes the connection.
pub(crate) async fn run(args: ClientArgs, token: CancellationToken) -> Result<()> {
    let connection = HttpConnectionBuilder::new(args.url.clone())
        .config(args.config())
        .build();
    connection.on_close(|err| match err {
        Some(err) => tracing::error!("connection closed: {err}"),
        None => tracing::info!("connection closed"),
    });

    tracing::info!(url = %args.url, "connecting");
    connection
        .start(token.clone())
        .await
        .context("failed to connect")?;
    tracing::info!(
        connection_id = ?connection.connection_id(),
        transport = ?connection.transport_type(),
        "connected"
    );

    connection
        .send(handshake::write_handshake_request(&HandshakeRequest::json())?)
        .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut inbox = Inbox::default();

    let outcome = loop {
        tokio::select! {
            () = token.cancelled() => break Ok(()),
            line = stdin.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => connection.send(record_separator::encode(line.as_bytes())).await?,
                None => {
                    tracing::debug!("stdin closed");
                    break Ok(());
                }
            },
            received = connection.recv() => match received {
                Ok(Some(bytes)) => {
                    for record in inbox.push(&bytes)? {
                        println!("{record}");
                    }
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            },
        }
    };

    connection.stop().await;
    outcome.context("connection failed")
}
