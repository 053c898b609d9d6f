//! Time-limited futures.
//!
//! Negotiation and transport connect attempts are bounded by a [`Timeout`]
//! so a silent server cannot hold a connection in `Connecting` forever.

use core::time::Duration;

use futures::{
    FutureExt,
    future::{BoxFuture, Either, select},
};
use futures_timer::Delay;
use thiserror::Error;

/// A strategy for time-limiting futures.
pub trait Timeout: Clone + Send + Sync + 'static {
    /// Resolve to [`TimedOut`] if `fut` is not done within `dur`.
    fn timeout<'a, T: 'a>(&'a self, dur: Duration, fut: BoxFuture<'a, T>) -> BoxFuture<'a, Result<T, TimedOut>>;
}

/// The deadline passed first.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
#[error("operation timed out")]
pub struct TimedOut;

/// Timeouts on the tokio timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeoutTokio;

impl Timeout for TimeoutTokio {
    fn timeout<'a, T: 'a>(&'a self, dur: Duration, fut: BoxFuture<'a, T>) -> BoxFuture<'a, Result<T, TimedOut>> {
        async move { tokio::time::timeout(dur, fut).await.map_err(|_elapsed| TimedOut) }.boxed()
    }
}

/// Timeouts on `futures-timer`, independent of the tokio clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FuturesTimerTimeout;

impl Timeout for FuturesTimerTimeout {
    fn timeout<'a, T: 'a>(&'a self, dur: Duration, fut: BoxFuture<'a, T>) -> BoxFuture<'a, Result<T, TimedOut>> {
        async move {
            match select(fut, Delay::new(dur)).await {
                Either::Left((value, _delay)) => Ok(value),
                Either::Right(_) => Err(TimedOut),
            }
        }
        .boxed()
    }
}
