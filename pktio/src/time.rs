//! Monotonic time as the stack sees it.
//!
//! Cache aging and TCP header-template liveness only need millisecond
//! deltas, so the whole interface is a single "what time is it" hook.  The
//! host wires it to whatever monotonic source it has; tests drive a
//! [`ManualClock`] by hand.

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotonic timestamp in milliseconds since an arbitrary epoch.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The epoch itself.
    pub const ZERO: Self = Self(0);

    /// Milliseconds elapsed since `earlier` (saturating at zero).
    #[inline]
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// This timestamp shifted forward by `ms` milliseconds.
    #[inline]
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0.wrapping_add(ms))
    }
}

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Timestamp;
}

/// A clock advanced explicitly by the host (or a test).
///
/// Hosts that tick time from their scheduler loop can share one of these
/// with the stack and bump it once per batch.
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`.
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp(self.now_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_since_saturates() {
        let a = Timestamp(100);
        let b = Timestamp(350);
        assert_eq!(b.millis_since(a), 250);
        assert_eq!(a.millis_since(b), 0, "negative delta saturates to zero");
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), Timestamp(1_000));
        clock.advance(500);
        assert_eq!(clock.now(), Timestamp(1_500));
        clock.set(10);
        assert_eq!(clock.now(), Timestamp(10));
    }
}
