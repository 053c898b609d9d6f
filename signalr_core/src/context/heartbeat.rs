//! Heartbeat callback distribution.
//!
//! Registration appends under a lock. A tick clones the callback list under
//! the same lock and then runs every callback without holding it, so a slow
//! callback delays later ticks but never blocks registration. A callback
//! registered while a tick is running may or may not see that tick.

use alloc::{sync::Arc, vec::Vec};
use core::time::Duration;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Shortest period [`Heartbeat::run`] will tick at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A list of cheap, non-blocking callbacks run on every tick.
#[derive(Default)]
pub struct Heartbeat {
    callbacks: Mutex<Vec<Callback>>,
}

impl Heartbeat {
    /// An empty heartbeat.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`, to be called with `state` on every tick.
    pub fn on_heartbeat<S>(&self, callback: impl Fn(&S) + Send + Sync + 'static, state: S)
    where
        S: Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(move || callback(&state));
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Run every registered callback once.
    pub fn tick(&self) {
        let snapshot = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in snapshot {
            callback();
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tick every `period` until `cancel` fires.
    ///
    /// The first tick happens one full period after the call. Periods
    /// shorter than [`MIN_PERIOD`] are raised to it.
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        let period = period.max(MIN_PERIOD);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }
    }
}

impl core::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("callbacks", &self.len())
            .finish()
    }
}
