//! Monotonic eventstamp generator.
//!
//! A [`Clock`] turns wall-clock readings into strictly increasing
//! [`Eventstamp`]s and absorbs stamps observed from remote replicas without
//! ever going backwards. One clock is created per store and lives for the
//! store's lifetime; every local write and every merged snapshot passes
//! through it.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::eventstamp::{Eventstamp, MAX_TIMESTAMP_MS};

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a controlled
/// one. The default implementation ([`SystemClock`]) delegates to
/// `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch")
            .as_millis() as u64
    }
}

/// Monotonic eventstamp generator.
///
/// State is simply the last emitted stamp, initially [`Eventstamp::MIN`].
/// [`Clock::now`] advances past it, [`Clock::forward`] fast-forwards to a
/// greater remote stamp, and [`Clock::latest`] reads without advancing.
///
/// # Examples
///
/// ```
/// use roost_core::clock::Clock;
///
/// let mut clock = Clock::system();
/// let a = clock.now();
/// let b = clock.now();
/// assert!(a < b);
/// ```
pub struct Clock {
    last: Eventstamp,
    source: Box<dyn ClockSource>,
}

impl Clock {
    /// Creates a clock over the given source.
    #[must_use]
    pub fn new(source: Box<dyn ClockSource>) -> Self {
        Self {
            last: Eventstamp::MIN,
            source,
        }
    }

    /// Creates a clock over the real system time.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Box::new(SystemClock))
    }

    /// Emits a fresh stamp, strictly greater than every stamp emitted or
    /// absorbed before it.
    ///
    /// When the wall clock has advanced past the last stamp's millisecond the
    /// counter resets to 0; otherwise the counter increments. A counter
    /// exhausted within one logical millisecond borrows the next millisecond
    /// so monotonicity holds unconditionally. The nonce is regenerated from
    /// the thread RNG on every call.
    pub fn now(&mut self) -> Eventstamp {
        // Clamp so every emitted stamp stays formattable.
        let wall = self.source.now().min(MAX_TIMESTAMP_MS);
        let (timestamp_ms, counter) = if wall > self.last.timestamp_ms {
            (wall, 0)
        } else if self.last.counter == u16::MAX {
            (self.last.timestamp_ms + 1, 0)
        } else {
            (self.last.timestamp_ms, self.last.counter + 1)
        };
        self.last = Eventstamp {
            timestamp_ms,
            counter,
            nonce: rand::random(),
        };
        self.last
    }

    /// Returns the last emitted stamp without advancing.
    #[must_use]
    pub fn latest(&self) -> Eventstamp {
        self.last
    }

    /// Absorbs a stamp observed from a remote replica.
    ///
    /// Adopts `stamp` as the new state iff it is greater than [`latest`]
    /// (so every subsequent [`now`] is strictly greater than it). An equal
    /// stamp is a silent no-op, which makes the operation idempotent; a
    /// strictly lesser stamp is an anomaly and is ignored with a warning.
    ///
    /// [`latest`]: Clock::latest
    /// [`now`]: Clock::now
    pub fn forward(&mut self, stamp: Eventstamp) {
        if stamp > self.last {
            self.last = stamp;
        } else if stamp < self.last {
            tracing::warn!(%stamp, latest = %self.last, "ignoring stale clock forward");
        }
    }
}
