//! Pending acknowledgement table.
//!
//! Group operations fanned out through a backplane are acknowledged by id.
//! Each pending id maps to a shared completion. An entry that is not
//! acknowledged within [`ACK_THRESHOLD`] is cancelled by the periodic sweep,
//! which bounds the table when acknowledgements are lost.

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, Shared},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How long an acknowledgement may stay pending.
pub const ACK_THRESHOLD: Duration = Duration::from_secs(30);

/// How often [`AckHandler::run`] sweeps.
pub const ACK_INTERVAL: Duration = Duration::from_secs(5);

/// The acknowledgement was cancelled by a sweep or by disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("acknowledgement cancelled")]
pub struct AckCancelled;

/// A pending acknowledgement.
///
/// Clones resolve together.
#[derive(Clone)]
pub struct Ack(Shared<BoxFuture<'static, Result<(), AckCancelled>>>);

impl Ack {
    fn pending(rx: oneshot::Receiver<()>) -> Self {
        Self(rx.map(|res| res.map_err(|_| AckCancelled)).boxed().shared())
    }

    fn ready() -> Self {
        Self(futures::future::ready(Ok(())).boxed().shared())
    }
}

impl Future for Ack {
    type Output = Result<(), AckCancelled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

impl core::fmt::Debug for Ack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Ack").finish_non_exhaustive()
    }
}

struct Entry {
    created: Instant,
    ack: Ack,
    // Dropping the sender cancels the ack.
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct Table {
    pending: HashMap<u64, Entry>,
    disposed: bool,
}

/// Tracks acknowledgements by id.
#[derive(Default)]
pub struct AckHandler {
    table: Mutex<Table>,
}

impl AckHandler {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending acknowledgement for `id`, creating it if needed.
    ///
    /// After [`dispose`](Self::dispose) the returned ack is already resolved.
    pub fn create_ack(&self, id: u64) -> Ack {
        self.create_ack_at(id, Instant::now())
    }

    fn create_ack_at(&self, id: u64, now: Instant) -> Ack {
        let mut table = self.lock();
        if table.disposed {
            return Ack::ready();
        }

        table
            .pending
            .entry(id)
            .or_insert_with(|| {
                let (tx, rx) = oneshot::channel();
                Entry {
                    created: now,
                    ack: Ack::pending(rx),
                    tx,
                }
            })
            .ack
            .clone()
    }

    /// Resolve the acknowledgement for `id`.
    ///
    /// Returns `false` if nothing was pending under that id.
    pub fn trigger_ack(&self, id: u64) -> bool {
        let entry = self.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(());
                true
            }
            None => false,
        }
    }

    /// Cancel every entry pending for longer than [`ACK_THRESHOLD`] at `now`.
    ///
    /// Returns how many were cancelled.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut table = self.lock();
        let before = table.pending.len();
        table
            .pending
            .retain(|_, entry| now.saturating_duration_since(entry.created) <= ACK_THRESHOLD);
        let expired = before - table.pending.len();
        if expired > 0 {
            tracing::debug!(expired, "cancelled stale acknowledgements");
        }
        expired
    }

    /// Sweep every [`ACK_INTERVAL`] until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + ACK_INTERVAL, ACK_INTERVAL);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }

    /// Cancel everything pending. Later [`create_ack`](Self::create_ack)
    /// calls resolve immediately.
    pub fn dispose(&self) {
        let mut table = self.lock();
        table.disposed = true;
        table.pending.clear();
    }

    /// Number of pending acknowledgements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for AckHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let table = self.lock();
        f.debug_struct("AckHandler")
            .field("pending", &table.pending.len())
            .field("disposed", &table.disposed)
            .finish()
    }
}
