//! Duplex message pipes.
//!
//! ```text
//!        application ends                    transport ends
//!   ┌──────────────────────┐            ┌──────────────────────┐
//!   │ output ──────────────┼──► [ch] ──►┼── input              │
//!   │ input  ◄─────────────┼─── [ch] ◄──┼── output             │
//!   └──────────────────────┘            └──────────────────────┘
//! ```
//!
//! Each direction is a bounded `async_channel`. Completing a writer lets the
//! reader drain what was already written and then observe the completion
//! reason. Completing a reader tells writers to stop.

use alloc::{string::String, sync::Arc, vec::Vec};
use std::sync::OnceLock;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Shareable failure used as a pipe completion reason.
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct CompletionError(Arc<dyn core::error::Error + Send + Sync>);

impl CompletionError {
    /// Wrap an error.
    pub fn new(err: impl core::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }

    /// A completion reason carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Borrow the underlying error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: core::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// The reading side of this direction is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pipe closed")]
pub struct PipeClosed;

#[derive(Debug, Default)]
struct Completion {
    reason: OnceLock<Option<CompletionError>>,
    written: CancellationToken,
}

/// Writing end of one direction.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    tx: async_channel::Sender<Vec<u8>>,
    completion: Arc<Completion>,
}

impl PipeWriter {
    /// Write one message, waiting while the pipe is full.
    ///
    /// # Errors
    ///
    /// Returns [`PipeClosed`] if either end has been completed.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), PipeClosed> {
        self.tx.send(data).await.map_err(|_| PipeClosed)
    }

    /// Finish writing, optionally with a failure.
    ///
    /// Returns `true` if this call completed the pipe. Later calls have no
    /// effect and their reason is discarded.
    pub fn complete(&self, reason: Option<CompletionError>) -> bool {
        let first = self.completion.reason.set(reason).is_ok();
        self.tx.close();
        self.completion.written.cancel();
        first
    }

    /// Wait until a writer of this direction has called
    /// [`complete`](Self::complete). A reader closing the pipe does not count.
    pub async fn completed(&self) {
        self.completion.written.cancelled().await;
    }

    /// Whether this direction has been completed from either end.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading end of one direction.
#[derive(Debug, Clone)]
pub struct PipeReader {
    rx: async_channel::Receiver<Vec<u8>>,
    completion: Arc<Completion>,
}

impl PipeReader {
    /// Read the next message.
    ///
    /// Returns `Ok(None)` once the writer has completed without error and
    /// every earlier message has been read.
    ///
    /// # Errors
    ///
    /// Returns the writer's completion reason once the pipe is drained.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, CompletionError> {
        match self.rx.recv().await {
            Ok(data) => Ok(Some(data)),
            Err(_) => self.completion_reason(),
        }
    }

    /// Read a message if one is buffered.
    ///
    /// # Errors
    ///
    /// See [`read`](Self::read).
    pub fn try_read(&self) -> Result<Option<Vec<u8>>, CompletionError> {
        match self.rx.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(async_channel::TryRecvError::Empty) => Ok(None),
            Err(async_channel::TryRecvError::Closed) => self.completion_reason(),
        }
    }

    /// Stop reading. Pending and future writes fail with [`PipeClosed`].
    pub fn complete(&self) {
        self.rx.close();
    }

    /// Whether this direction has been completed from either end.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.rx.is_closed()
    }

    fn completion_reason(&self) -> Result<Option<Vec<u8>>, CompletionError> {
        match self.completion.reason.get() {
            Some(Some(err)) => Err(err.clone()),
            _ => Ok(None),
        }
    }
}

/// One party's two ends of a duplex pipe.
#[derive(Debug, Clone)]
pub struct DuplexPipe {
    /// Messages arriving from the other party.
    pub input: PipeReader,

    /// Messages leaving for the other party.
    pub output: PipeWriter,
}

impl DuplexPipe {
    /// Complete both ends: the output with `reason`, then the input.
    pub fn complete(&self, reason: Option<CompletionError>) {
        self.output.complete(reason);
        self.input.complete();
    }
}

/// Create a connected pair of duplex pipes, each direction buffering up to
/// `capacity` messages.
///
/// The first element is conventionally held by the application, the second
/// by the transport.
#[must_use]
pub fn duplex(capacity: usize) -> (DuplexPipe, DuplexPipe) {
    let (a_out, b_in) = direction(capacity);
    let (b_out, a_in) = direction(capacity);
    (
        DuplexPipe {
            input: a_in,
            output: a_out,
        },
        DuplexPipe {
            input: b_in,
            output: b_out,
        },
    )
}

fn direction(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    let completion = Arc::new(Completion::default());
    (
        PipeWriter {
            tx,
            completion: completion.clone(),
        },
        PipeReader { rx, completion },
    )
}
