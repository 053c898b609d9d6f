//! Delays between connect attempts.
//!
//! The connection retries its initial connect after the same fixed delay
//! every time.
//!
//! # Example
//!
//! ```
//! use core::time::Duration;
//! use signalr_core::backoff::Backoff;
//!
//! let fixed = Backoff::fixed(Duration::from_secs(1));
//! assert_eq!(fixed.next_delay(), Duration::from_secs(1));
//! assert_eq!(fixed.next_delay(), Duration::from_secs(1));
//! ```

use core::time::Duration;

/// A retry delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    /// The same delay before every attempt.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// The delay before the next attempt.
    #[must_use]
    pub const fn next_delay(&self) -> Duration {
        self.delay
    }
}
